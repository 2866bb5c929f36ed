//! Animation library adapters.
//!
//! Some libraries run their own clock and ignore both the declarative
//! animation API and virtual time. Each adapter here describes, as page-side
//! JavaScript, how to:
//!
//! - recognise the library once it is assigned to its global,
//! - wrap the factory so every instance it creates is tracked,
//! - wrap one instance so seeking it behaves like real playback,
//! - seek a tracked instance to a timestamp.
//!
//! The composed script registers the adapter with the automation runtime,
//! which owns the identity-keyed "already patched" set. Adding a library
//! means adding one adapter to [`PatchRegistry::builtin`].

mod anime;
mod gsap;

pub use anime::AnimeAdapter;
pub use gsap::GsapAdapter;

use crate::automation::AutomationState;
use crate::driver::CaptureDriver;
use crate::result::CaptureResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Page-side description of one animation library
pub trait AnimationLibraryAdapter: Send + Sync + fmt::Debug {
    /// Stable adapter name
    fn name(&self) -> &'static str;

    /// Global property the library is assigned to
    fn global(&self) -> &'static str;

    /// Expression that is truthy when the library is present
    fn detect_js(&self) -> &'static str;

    /// Helper declarations shared by the functions below
    fn prelude_js(&self) -> &'static str {
        ""
    }

    /// `function (factory) { ... return factory; }`
    fn wrap_factory_js(&self) -> &'static str;

    /// `function (instance) { ... }`
    fn wrap_instance_js(&self) -> &'static str;

    /// `function (instance, ms) { ... }`
    fn seek_js(&self) -> &'static str;

    /// Self-registering script bound to `state`'s namespace
    fn injection_script(&self, state: &AutomationState) -> String {
        let body = format!(
            r#"
(function () {{
    'use strict';
    var state = window['__NS__'];
    if (!state) {{ return; }}
    var adapter = {{
        name: '{name}',
        global: '{global}',
        detect: function () {{ return ({detect}); }}
    }};
{prelude}
    adapter.wrapFactory = {factory};
    adapter.wrapInstance = {instance};
    adapter.seek = {seek};
    state.registerAdapter(adapter);
}})();
"#,
            name = self.name(),
            global = self.global(),
            detect = self.detect_js(),
            prelude = self.prelude_js(),
            factory = self.wrap_factory_js(),
            instance = self.wrap_instance_js(),
            seek = self.seek_js(),
        );
        state.bind(&body)
    }
}

/// An injectable patch ready for a context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkPatch {
    /// Adapter name
    pub name: String,
    /// Global whose assignment activates the patch
    pub activation: String,
    /// Init script
    pub script: String,
}

/// Ordered set of adapters
#[derive(Debug)]
pub struct PatchRegistry {
    adapters: Vec<Box<dyn AnimationLibraryAdapter>>,
}

impl Default for PatchRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PatchRegistry {
    /// Registry without adapters
    #[must_use]
    pub fn empty() -> Self {
        Self {
            adapters: Vec::new(),
        }
    }

    /// Registry with every shipped adapter
    #[must_use]
    pub fn builtin() -> Self {
        Self::empty()
            .with_adapter(Box::new(AnimeAdapter))
            .with_adapter(Box::new(GsapAdapter))
    }

    /// Add an adapter; a duplicate name replaces the earlier one
    #[must_use]
    pub fn with_adapter(mut self, adapter: Box<dyn AnimationLibraryAdapter>) -> Self {
        self.adapters.retain(|a| a.name() != adapter.name());
        self.adapters.push(adapter);
        self
    }

    /// Adapter names in installation order
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|a| a.name()).collect()
    }

    /// Look up an adapter
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn AnimationLibraryAdapter> {
        self.adapters
            .iter()
            .find(|a| a.name() == name)
            .map(AsRef::as_ref)
    }

    /// Patches bound to `state`
    #[must_use]
    pub fn patches(&self, state: &AutomationState) -> Vec<FrameworkPatch> {
        self.adapters
            .iter()
            .map(|a| FrameworkPatch {
                name: a.name().to_string(),
                activation: a.global().to_string(),
                script: a.injection_script(state),
            })
            .collect()
    }

    /// Register every patch not yet installed in this context
    ///
    /// Returns the names installed by this call.
    pub async fn install(
        &self,
        driver: &mut dyn CaptureDriver,
        state: &mut AutomationState,
    ) -> CaptureResult<Vec<String>> {
        let mut installed = Vec::new();
        for patch in self.patches(state) {
            if state.installed_patches().contains(&patch.name) {
                debug!(patch = %patch.name, "patch already installed");
                continue;
            }
            driver.add_init_script(&patch.script).await?;
            state.mark_patch_installed(&patch.name);
            debug!(patch = %patch.name, global = %patch.activation, "patch registered");
            installed.push(patch.name);
        }
        Ok(installed)
    }
}
