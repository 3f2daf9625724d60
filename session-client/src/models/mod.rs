pub mod request;
pub mod session;

pub use request::{MultipartPart, RequestBody, RequestOptions};
pub use session::{Identity, LogoutReason, SessionSnapshot, SessionStatus, TokenPair};
