pub mod access_repo;
pub mod payment_repo;
pub mod reminder_repo;
pub mod subscription_repo;
pub mod user_repo;
pub mod verification_repo;

pub use access_repo::AccessGrantRepository;
pub use payment_repo::PaymentRepository;
pub use reminder_repo::ReminderRepository;
pub use subscription_repo::SubscriptionRepository;
pub use user_repo::UserRepository;
pub use verification_repo::VerificationRepository;
