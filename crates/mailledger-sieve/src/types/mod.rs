//! Core ManageSieve types.
//!
//! Data produced by the response parser: status trailers, response codes,
//! capability listings and script listings (RFC 5804).

#![allow(clippy::missing_const_for_fn)]

mod capability;
mod response;
mod response_code;
mod script;

pub use capability::Capabilities;
pub use response::{Response, Status};
pub use response_code::{DEFAULT_PORT, Referral, ResponseCode};
pub use script::ScriptInfo;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_order() {
        assert!(Status::Ok < Status::Bye);
        assert!(Status::Bye < Status::No);
        assert_eq!(Status::No as u8, 2);
    }

    #[test]
    fn test_response_code_from_parts() {
        let code = ResponseCode::from_parts(vec!["SASL".into(), "dj1hYmM=".into()]);
        assert_eq!(code, ResponseCode::Sasl("dj1hYmM=".into()));

        let code = ResponseCode::from_parts(vec!["quota/maxsize".into()]);
        assert_eq!(code, ResponseCode::Quota(Some("MAXSIZE".into())));
    }

    #[test]
    fn test_script_info_display() {
        assert_eq!(ScriptInfo::new("vacation", true).to_string(), "vacation (active)");
        assert_eq!(ScriptInfo::new("spam", false).to_string(), "spam");
    }
}
