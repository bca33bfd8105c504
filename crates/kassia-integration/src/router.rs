//! Strategy selection by asset format.

use std::sync::Arc;
use std::time::Instant;

use kassia_assets::{AssetDescriptor, TypeTag};
use kassia_servicing::ImageServicer;

use crate::deferred::DeferredExecutor;
use crate::immediate::ImmediateExecutor;
use crate::model::{IntegrationResult, IntegrationTarget, Strategy};

/// Strategy for a format tag.
#[must_use]
pub const fn strategy_for(type_tag: &TypeTag) -> Strategy {
    match type_tag {
        TypeTag::Inf | TypeTag::Msu | TypeTag::Cab => Strategy::Immediate,
        TypeTag::Exe | TypeTag::Msi | TypeTag::Appx => Strategy::Deferred,
        TypeTag::Wim | TypeTag::Script | TypeTag::Unknown(_) => Strategy::Skipped,
    }
}

/// Strategy paired with the executor that carries it out.
pub enum Route<'a> {
    /// Apply through the servicing utility.
    Immediate(&'a ImmediateExecutor),
    /// Stage for first boot.
    Deferred(&'a DeferredExecutor),
    /// Do not apply.
    Skipped {
        /// Why the asset is not applied.
        reason: String,
    },
}

impl Route<'_> {
    /// Strategy of this route.
    #[must_use]
    pub const fn strategy(&self) -> Strategy {
        match self {
            Self::Immediate(_) => Strategy::Immediate,
            Self::Deferred(_) => Strategy::Deferred,
            Self::Skipped { .. } => Strategy::Skipped,
        }
    }
}

/// Routes assets to the immediate or deferred executor.
#[derive(Clone)]
pub struct Router {
    immediate: ImmediateExecutor,
    deferred: DeferredExecutor,
}

impl Router {
    /// Router whose immediate executor uses `servicer`.
    #[must_use]
    pub fn new(servicer: Arc<dyn ImageServicer>) -> Self {
        Self {
            immediate: ImmediateExecutor::new(servicer),
            deferred: DeferredExecutor,
        }
    }

    /// Select the route for `asset`. Never fails.
    #[must_use]
    pub fn route(&self, asset: &AssetDescriptor) -> Route<'_> {
        match strategy_for(&asset.type_tag) {
            Strategy::Immediate => Route::Immediate(&self.immediate),
            Strategy::Deferred => Route::Deferred(&self.deferred),
            Strategy::Skipped => Route::Skipped {
                reason: format!(
                    "unsupported {} type '{}'",
                    asset.kind, asset.type_tag
                ),
            },
        }
    }

    /// Route and execute one asset. Always returns a result with its duration set.
    pub async fn execute(
        &self,
        asset: &AssetDescriptor,
        target: &IntegrationTarget,
    ) -> IntegrationResult {
        let started = Instant::now();
        match self.route(asset) {
            Route::Immediate(executor) => executor.execute(asset, target).await,
            Route::Deferred(executor) => executor.execute(asset, target).await,
            Route::Skipped { reason } => {
                IntegrationResult::failure(asset, Strategy::Skipped, reason, started.elapsed())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_is_a_function_of_type_tag() {
        assert_eq!(strategy_for(&TypeTag::Inf), Strategy::Immediate);
        assert_eq!(strategy_for(&TypeTag::Msu), Strategy::Immediate);
        assert_eq!(strategy_for(&TypeTag::Cab), Strategy::Immediate);
        assert_eq!(strategy_for(&TypeTag::Exe), Strategy::Deferred);
        assert_eq!(strategy_for(&TypeTag::Msi), Strategy::Deferred);
        assert_eq!(strategy_for(&TypeTag::Appx), Strategy::Deferred);
        assert_eq!(
            strategy_for(&TypeTag::Unknown("zip".into())),
            Strategy::Skipped
        );
    }
}
