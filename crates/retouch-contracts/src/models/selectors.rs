use super::registry::{Capability, ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_default(),
        }
    }

    /// Picks the requested model when it supports `capability`, otherwise the
    /// registry default, recording why the fallback happened.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: Capability,
    ) -> Result<ModelSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let fallback_reason = match requested {
            Some(name) => {
                if let Some(model) = self.registry.ensure(name, capability) {
                    return Ok(ModelSelection {
                        model,
                        requested: Some(name.to_string()),
                        fallback_reason: None,
                    });
                }
                format!("Requested model '{name}' unavailable for capability '{capability}'.")
            }
            None => "No model specified; using default.".to_string(),
        };

        let Some(model) = self.registry.by_capability(capability).into_iter().next() else {
            return Err(format!(
                "No models available for capability '{capability}'."
            ));
        };
        Ok(ModelSelection {
            model,
            requested: requested.map(str::to_string),
            fallback_reason: Some(fallback_reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::ModelSelector;
    use crate::models::{Capability, ModelRegistry, ModelSpec};

    fn registry_of(specs: &[(&str, Capability)]) -> ModelRegistry {
        let mut models = IndexMap::new();
        for (name, capability) in specs {
            models.insert(
                name.to_string(),
                ModelSpec {
                    name: name.to_string(),
                    provider: "dryrun".to_string(),
                    capabilities: vec![*capability],
                },
            );
        }
        ModelRegistry::new(Some(models))
    }

    #[test]
    fn requested_model_wins_when_capable() {
        let selector = ModelSelector::new(Some(registry_of(&[
            ("a", Capability::ImageEdit),
            ("b", Capability::ImageEdit),
        ])));
        let selection = selector.select(Some("b"), Capability::ImageEdit);
        assert_eq!(selection.map(|value| value.model.name), Ok("b".to_string()));
    }

    #[test]
    fn falls_back_with_a_reason() {
        let selector = ModelSelector::new(Some(registry_of(&[
            ("img", Capability::ImageEdit),
            ("txt", Capability::Text),
        ])));
        let selection = selector
            .select(Some("txt"), Capability::ImageEdit)
            .unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(selection.model.name, "img");
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("Requested model 'txt' unavailable for capability 'image_edit'.")
        );

        let default = selector
            .select(None, Capability::Text)
            .unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(
            default.fallback_reason.as_deref(),
            Some("No model specified; using default.")
        );
    }

    #[test]
    fn errors_when_nothing_supports_the_capability() {
        let selector = ModelSelector::new(Some(registry_of(&[("txt", Capability::Text)])));
        assert_eq!(
            selector.select(None, Capability::ImageEdit).err(),
            Some("No models available for capability 'image_edit'.".to_string())
        );
    }
}
