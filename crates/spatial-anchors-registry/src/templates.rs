//! Representation templates that bound anchors are instantiated from.

use serde::{Deserialize, Serialize};

use crate::error::{AnchorError, Result};

/// A named representation that a bound anchor is instantiated from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorTemplate {
    pub name: String,
}

impl AnchorTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Named templates plus the default used when no name matches.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: Vec<AnchorTemplate>,
    default: AnchorTemplate,
}

impl TemplateCatalog {
    pub fn builder() -> TemplateCatalogBuilder {
        TemplateCatalogBuilder::default()
    }

    /// Catalog with only a default template
    pub fn with_default(default: AnchorTemplate) -> Self {
        Self {
            templates: Vec::new(),
            default,
        }
    }

    pub fn default_template(&self) -> &AnchorTemplate {
        &self.default
    }

    pub fn templates(&self) -> &[AnchorTemplate] {
        &self.templates
    }

    /// First template whose name contains `anchor_name`.
    pub fn find(&self, anchor_name: &str) -> Option<&AnchorTemplate> {
        if anchor_name.is_empty() {
            return None;
        }
        self.templates.iter().find(|t| t.name.contains(anchor_name))
    }

    /// Template for an anchor name, falling back to the default.
    pub fn resolve(&self, anchor_name: Option<&str>) -> &AnchorTemplate {
        anchor_name
            .and_then(|name| self.find(name))
            .unwrap_or(&self.default)
    }
}

#[derive(Debug, Default)]
pub struct TemplateCatalogBuilder {
    templates: Vec<AnchorTemplate>,
    default: Option<AnchorTemplate>,
}

impl TemplateCatalogBuilder {
    pub fn template(mut self, template: AnchorTemplate) -> Self {
        self.templates.push(template);
        self
    }

    pub fn default_template(mut self, template: AnchorTemplate) -> Self {
        self.default = Some(template);
        self
    }

    /// Fails with [`AnchorError::MissingCollaborator`] without a default template.
    pub fn build(self) -> Result<TemplateCatalog> {
        let default = self
            .default
            .ok_or(AnchorError::MissingCollaborator("default anchor template"))?;
        Ok(TemplateCatalog {
            templates: self.templates,
            default,
        })
    }
}
