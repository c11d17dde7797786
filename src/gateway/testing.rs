use std::sync::{Arc, Mutex};

use super::{BlockingGateway, GatewayError, UsageStat};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Block { ids: Vec<String>, duration_hours: u32 },
    Unblock { ids: Vec<String> },
}

/// Gateway double that records calls and fails on demand
#[derive(Clone, Default)]
pub struct RecordingGateway {
    calls: Arc<Mutex<Vec<GatewayCall>>>,
    fail_block: Arc<Mutex<bool>>,
    fail_unblock: Arc<Mutex<bool>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_block() -> Self {
        let gateway = Self::default();
        gateway.set_fail_block(true);
        gateway
    }

    pub fn failing_unblock() -> Self {
        let gateway = Self::default();
        *gateway.fail_unblock.lock().unwrap() = true;
        gateway
    }

    pub fn set_fail_block(&self, fail: bool) {
        *self.fail_block.lock().unwrap() = fail;
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl BlockingGateway for RecordingGateway {
    async fn block_apps(&self, ids: &[String], duration_hours: u32) -> Result<(), GatewayError> {
        self.calls.lock().unwrap().push(GatewayCall::Block {
            ids: ids.to_vec(),
            duration_hours,
        });
        if *self.fail_block.lock().unwrap() {
            return Err(GatewayError::Unavailable("enforcement service offline".to_string()));
        }
        Ok(())
    }

    async fn unblock_apps(&self, ids: &[String]) -> Result<(), GatewayError> {
        self.calls
            .lock()
            .unwrap()
            .push(GatewayCall::Unblock { ids: ids.to_vec() });
        if *self.fail_unblock.lock().unwrap() {
            return Err(GatewayError::Rejected {
                operation: "unblockApps",
            });
        }
        Ok(())
    }

    async fn is_app_blocked(&self, _id: &str) -> Result<bool, GatewayError> {
        Ok(false)
    }

    async fn usage_stats(&self) -> Result<Vec<UsageStat>, GatewayError> {
        Ok(Vec::new())
    }

    async fn request_permissions(&self) -> Result<bool, GatewayError> {
        Ok(true)
    }
}
