use std::sync::Arc;

use clubgate_db::sqlx::PgPool;

use crate::config::Settings;
use crate::gate::ChatGate;
use crate::services::access_service::AccessService;
use crate::services::payment_service::PaymentService;
use crate::services::verify_service::VerifyService;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub settings: Arc<Settings>,
    pub gate: Arc<dyn ChatGate>,
    pub payments: Arc<PaymentService>,
    pub access: Arc<AccessService>,
    pub verify: Arc<VerifyService>,
}

impl AppState {
    pub fn new(pool: PgPool, settings: Arc<Settings>, gate: Arc<dyn ChatGate>) -> Self {
        let payments = Arc::new(PaymentService::new(pool.clone(), settings.clone()));
        let access = Arc::new(AccessService::new(pool.clone(), gate.clone()));
        let verify = Arc::new(VerifyService::new(pool.clone()));
        Self {
            pool,
            settings,
            gate,
            payments,
            access,
            verify,
        }
    }
}
