use secrecy::SecretString;

/// Secret-bearing process configuration shared with the server bootstrap.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub session_secret: SecretString,
    pub sms_api_url: Option<String>,
    pub sms_api_key: Option<SecretString>,
    pub in_memory_rate_limit: bool,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(session_secret: SecretString) -> Self {
        Self {
            session_secret,
            sms_api_url: None,
            sms_api_key: None,
            in_memory_rate_limit: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_global_args() {
        let args = GlobalArgs::new(SecretString::from("0123456789abcdef0123456789abcdef"));
        assert_eq!(
            args.session_secret.expose_secret(),
            "0123456789abcdef0123456789abcdef"
        );
        assert!(args.sms_api_url.is_none());
        assert!(args.sms_api_key.is_none());
        assert!(!args.in_memory_rate_limit);
    }
}
