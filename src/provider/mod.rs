pub mod log;
pub mod mailgun;
pub mod mock;
pub mod traits;

pub use self::log::LogProvider;
pub use mailgun::MailgunProvider;
pub use mock::MockProvider;
pub use traits::{BatchPayload, EmailProvider, ProviderError, ProviderReceipt};
