use std::sync::{LazyLock, RwLock};

pub static CONFIGURATION: LazyLock<RwLock<Configuration>> =
    LazyLock::new(|| RwLock::new(Configuration::default()));

pub struct Configuration {
    pub constraint_tolerance: f64,
    pub qr_rank_tolerance: f64,
    pub residual_warning_exponent: f64,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            constraint_tolerance: 1e-09,
            qr_rank_tolerance: 1e-10,
            residual_warning_exponent: -4.,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::configuration::CONFIGURATION;

    #[test]
    fn test_defaults() {
        let config = CONFIGURATION.read().unwrap();
        assert_eq!(config.constraint_tolerance, 1e-09);
        assert_eq!(config.qr_rank_tolerance, 1e-10);
        assert_eq!(config.residual_warning_exponent, -4.);
    }
}
