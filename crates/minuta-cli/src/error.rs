//! Error display and exit-code mapping.
//!
//! Exit codes: 0 success, 1 configuration error, 2 external dependency
//! failure.

use minuta_core::{MinutaError, ProviderError};

pub const EXIT_OK: i32 = 0;
pub const EXIT_CONFIG: i32 = 1;
pub const EXIT_DEPENDENCY: i32 = 2;

/// Map an error to the process exit code.
pub fn exit_code(err: &MinutaError) -> i32 {
    match err {
        MinutaError::InvalidInput(_) | MinutaError::Auth(_) => EXIT_CONFIG,
        MinutaError::Provider(ProviderError::MissingApiKey { .. })
        | MinutaError::Provider(ProviderError::NotFound(_)) => EXIT_CONFIG,
        MinutaError::Cancelled => EXIT_OK,
        _ => EXIT_DEPENDENCY,
    }
}

/// Print an error with a resolution hint where one exists.
pub fn display_error(err: &MinutaError) {
    match err {
        MinutaError::InvalidInput(msg) => {
            eprintln!("Error: invalid input");
            eprintln!("{msg}");
            eprintln!();
            eprintln!("Hint: check --config keys and value ranges");
        }
        MinutaError::Auth(msg) => {
            eprintln!("Error: authentication failed");
            eprintln!("{msg}");
            eprintln!();
            eprintln!("Hint: set HUGGINGFACE_TOKEN and the provider API key");
        }
        MinutaError::Provider(ProviderError::MissingApiKey { provider }) => {
            eprintln!("Error: no API key configured for {provider}");
            eprintln!();
            eprintln!("Hint: pass --api-key or set {}_API_KEY", provider.to_uppercase());
        }
        MinutaError::NotFound(msg) => {
            eprintln!("Error: not found: {msg}");
            eprintln!();
            eprintln!("Hint: check the user/audio ids and the --data-dir layout");
        }
        MinutaError::Cancelled => {
            eprintln!("Processing cancelled");
        }
        other => {
            eprintln!("Error: {other}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_by_kind() {
        assert_eq!(exit_code(&MinutaError::invalid_input("bad key")), EXIT_CONFIG);
        assert_eq!(exit_code(&MinutaError::auth("no token")), EXIT_CONFIG);
        assert_eq!(exit_code(&MinutaError::not_found("blob")), EXIT_DEPENDENCY);
        assert_eq!(exit_code(&MinutaError::transient("timeout")), EXIT_DEPENDENCY);
        assert_eq!(exit_code(&MinutaError::Cancelled), EXIT_OK);
    }
}
