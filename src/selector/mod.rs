//! # Selector Module
//!
//! This module implements load balancing strategies for endpoint selection.
//!
//! ## Strategies
//!
//! - **Round Robin**: Default strategy; strict rotation when weights are
//!   equal, weight-proportional interleaving otherwise
//! - **Random**: Weight-proportional random selection

mod random;
mod roundrobin;

pub use random::Random;
pub use roundrobin::RoundRobin;

use crate::consts;
use crate::url::Url;

/// Weight accessor for selection candidates. Higher weights receive
/// proportionally more selections; zero-weight candidates are skipped
/// whenever any positive weight exists.
pub trait Weighted {
    fn weight(&self) -> u32;
}

impl Weighted for Url {
    fn weight(&self) -> u32 {
        self.parameter_as_int(consts::WEIGHT_KEY, consts::DEFAULT_WEIGHT as i64)
            .clamp(0, u32::MAX as i64) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_weight_parameter() {
        let url = Url::new("dubbo", "127.0.0.1", 20880, "demo.Greeter");
        assert_eq!(url.weight(), consts::DEFAULT_WEIGHT);
        assert_eq!(url.with_parameter("weight", "5").weight(), 5);
        assert_eq!(url.with_parameter("weight", "-3").weight(), 0);
    }
}
