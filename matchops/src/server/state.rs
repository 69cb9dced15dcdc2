//! Server state

use std::sync::Arc;

use crate::deploy::executor::DeploymentService;
use crate::security::pipeline::SecurityPipeline;
use crate::store::SecurityAlertStore;

/// Server state shared across handlers
pub struct ServerState {
    pub deployments: Arc<DeploymentService>,
    pub pipeline: Arc<SecurityPipeline>,
    pub alerts: Arc<dyn SecurityAlertStore>,
}

impl ServerState {
    pub fn new(
        deployments: Arc<DeploymentService>,
        pipeline: Arc<SecurityPipeline>,
        alerts: Arc<dyn SecurityAlertStore>,
    ) -> Self {
        Self {
            deployments,
            pipeline,
            alerts,
        }
    }
}
