//! Mail server collaborators: IMAP mailbox access and SMTP reply delivery.

pub mod imap;
pub mod mailbox;
pub mod smtp;
pub mod tls;
