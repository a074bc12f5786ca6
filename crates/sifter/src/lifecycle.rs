//! Lifecycle hooks of component instances.
//!
//! The helper drives one instance through configuration, injection,
//! validation and initialization, and later through close. Which hooks run
//! is decided by the component's descriptor: partition workers skip hooks
//! that are not marked as distributed.

use snafu::prelude::*;
use tracing::debug;

use crate::component::{ComponentContext, ComponentInstance};
use crate::error::{ComponentError, ConfigurationSnafu};
use crate::job::JobComponent;
use crate::row::Column;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleHelper {
    include_non_distributed: bool,
}

impl LifecycleHelper {
    /// `include_non_distributed` is false for partition workers.
    pub fn new(include_non_distributed: bool) -> Self {
        Self {
            include_non_distributed,
        }
    }

    pub fn include_non_distributed(&self) -> bool {
        self.include_non_distributed
    }

    fn runs(&self, distributed: bool) -> bool {
        distributed || self.include_non_distributed
    }

    /// Configure, inject, validate and initialize one instance.
    ///
    /// On error the instance must not receive rows, but it still has to be
    /// closed.
    pub async fn initialize(
        &self,
        instance: &mut ComponentInstance,
        component: &JobComponent,
        columns: &[Column],
        context: &ComponentContext,
    ) -> Result<(), ComponentError> {
        let descriptor = &component.descriptor;

        for name in descriptor.required_properties() {
            ensure!(
                component.properties.contains_key(name),
                ConfigurationSnafu {
                    message: format!("missing required property '{name}'"),
                }
            );
        }
        for name in component.properties.keys() {
            ensure!(
                descriptor.declares_property(name),
                ConfigurationSnafu {
                    message: format!("unknown property '{name}' for {}", descriptor.name),
                }
            );
        }

        let lifecycle = instance.lifecycle();
        lifecycle.configure(&component.config(columns))?;
        lifecycle.inject(context);
        if descriptor.validate {
            lifecycle.validate()?;
        }
        if let Some(hook) = descriptor.initialize
            && self.runs(hook.distributed)
        {
            lifecycle.initialize().await?;
        }

        debug!(component = %component.key, partition = %context.partition, "Component initialized");
        Ok(())
    }

    /// Close one instance. Hooks that do not apply to `success`, or that are
    /// not distributed on a partition worker, are skipped.
    pub async fn close(
        &self,
        instance: &mut ComponentInstance,
        component: &JobComponent,
        success: bool,
    ) -> Result<(), ComponentError> {
        match component.descriptor.close {
            Some(hook) if hook.runs_for(success) && self.runs(hook.distributed) => {
                instance.lifecycle().close(success).await?;
                debug!(component = %component.key, success, "Component closed");
            }
            _ => debug!(component = %component.key, success, "Close hook skipped"),
        }
        Ok(())
    }
}

impl Default for LifecycleHelper {
    fn default() -> Self {
        Self::new(true)
    }
}
