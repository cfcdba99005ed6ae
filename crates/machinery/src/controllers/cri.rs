use resource_state::{Context, Controller, ControllerRuntime, Input, Output};

use crate::resources::config::{MachineConfig, ACTIVE_ID};
use crate::resources::cri::{RegistriesConfig, REGISTRIES_ID};

/// Copies the registry mirrors and per-host settings out of the machine
/// config.
pub struct RegistriesController;

#[async_trait::async_trait]
impl Controller for RegistriesController {
    fn name(&self) -> &str {
        "cri.RegistriesConfigController"
    }

    fn inputs(&self) -> Vec<Input> {
        vec![Input::weak_id::<MachineConfig>(ACTIVE_ID)]
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::of::<RegistriesConfig>()]
    }

    async fn run(&self, ctx: &Context, r: &mut ControllerRuntime) -> anyhow::Result<()> {
        while r.event(ctx).await {
            let derived = super::active_config(ctx, r)
                .await?
                .map(|(_, config)| Ok::<_, std::convert::Infallible>(RegistriesConfig::from(config.machine().registries())));
            super::apply(ctx, r, REGISTRIES_ID, derived).await?;
        }
        Ok(())
    }
}
