pub mod email;
pub mod resend;

pub use email::{Mailer, MailError, OutboundEmail, SendReceipt, build_mailer, wrap_html};
