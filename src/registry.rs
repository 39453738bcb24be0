use std::collections::HashMap;

use crate::error::ChatError;
use crate::provider::{DynProvider, ProviderKind, select_provider};

/// Maps provider families to adapter instances and resolves model ids to them.
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, DynProvider>,
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder {
            providers: HashMap::new(),
        }
    }

    /// Adapter serving `model`.
    ///
    /// # Errors
    ///
    /// [`ChatError::UnsupportedProvider`] when the id is blank or its family has no
    /// registered adapter.
    pub fn resolve(&self, model: &str) -> Result<DynProvider, ChatError> {
        let kind = select_provider(model)?;
        self.get(kind).ok_or_else(|| ChatError::UnsupportedProvider {
            model: model.to_string(),
        })
    }

    pub fn get(&self, kind: ProviderKind) -> Option<DynProvider> {
        self.providers.get(&kind).cloned()
    }

    /// Registered families, in no particular order.
    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.providers.keys().copied().collect()
    }

    /// Whether the adapter for `model` would forward images; `false` when none resolves.
    pub fn supports_images(&self, model: &str) -> bool {
        self.resolve(model)
            .map(|provider| provider.supports_images(model))
            .unwrap_or(false)
    }
}

pub struct ProviderRegistryBuilder {
    providers: HashMap<ProviderKind, DynProvider>,
}

impl ProviderRegistryBuilder {
    /// Registers `provider` for `kind`, replacing any earlier registration.
    pub fn register(mut self, kind: ProviderKind, provider: DynProvider) -> Self {
        self.providers.insert(kind, provider);
        self
    }

    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry {
            providers: self.providers,
        }
    }
}
