//! Token provider boundary (§6): the core never persists nor decodes a
//! token, only forwards it into a child's env before spawn.

use fleet_core::FleetError;

pub trait TokenProvider: Send + Sync {
    fn get_token(&self) -> Result<String, FleetError>;
}

/// Reads the token from a fixed environment variable on every call, so a
/// rotated value takes effect on the next spawn without a restart.
pub struct EnvTokenProvider {
    env_var: String,
}

impl EnvTokenProvider {
    #[must_use]
    pub fn new(env_var: impl Into<String>) -> Self {
        Self { env_var: env_var.into() }
    }
}

impl Default for EnvTokenProvider {
    fn default() -> Self {
        Self::new("FLEETD_TOKEN")
    }
}

impl TokenProvider for EnvTokenProvider {
    fn get_token(&self) -> Result<String, FleetError> {
        std::env::var(&self.env_var).map_err(|_| FleetError::InvalidArgument(format!("{} not set", self.env_var)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_env_var_is_invalid_argument() {
        let provider = EnvTokenProvider::new("FLEETD_TOKEN_DOES_NOT_EXIST");
        assert!(matches!(provider.get_token(), Err(FleetError::InvalidArgument(_))));
    }

    #[test]
    fn present_env_var_is_forwarded_verbatim() {
        unsafe {
            std::env::set_var("FLEETD_TOKEN_TEST", "sekret");
        }
        let provider = EnvTokenProvider::new("FLEETD_TOKEN_TEST");
        assert_eq!(provider.get_token().unwrap(), "sekret");
        unsafe {
            std::env::remove_var("FLEETD_TOKEN_TEST");
        }
    }
}
