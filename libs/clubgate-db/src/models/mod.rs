pub mod access_grant;
pub mod payment;
pub mod reminder;
pub mod subscription;
pub mod user;
pub mod verification;

pub use access_grant::AccessGrant;
pub use payment::Payment;
pub use reminder::Reminder;
pub use subscription::Subscription;
pub use user::User;
pub use verification::VerificationToken;
