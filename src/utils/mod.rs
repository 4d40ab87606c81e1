//! 유틸리티 모듈.

pub mod archive;
pub mod crypto;
pub mod jwt;
pub mod qr;
pub mod share_code;
pub mod throttle;

pub use archive::{build_zip, sanitize_file_name};
pub use crypto::{derive_key, gen_salt, open, seal};
pub use jwt::{gen_token, gen_visitor_id, parse_token, resolve_visitor, Claims, VisitorSession};
pub use qr::{render_data_uri, render_png, share_qr_payload};
pub use share_code::{gen_share_code, hash_share_code, validate_share_code};
