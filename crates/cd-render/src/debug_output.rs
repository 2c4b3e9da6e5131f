//! Driver debug-output forwarding
//!
//! Several debug-output mechanisms overlap, so exactly one is installed: the
//! first of [`DEBUG_CHAIN`] the context supports.

use tracing::{info, warn};

use crate::backend::{
    Capabilities, DebugApi, DebugMessage, DebugSeverity, GraphicsBackend, GraphicsFeatures,
};

/// Probe order, most specific first
pub const DEBUG_CHAIN: [DebugApi; 4] = [
    DebugApi::Core43,
    DebugApi::KhrDebug,
    DebugApi::ArbDebugOutput,
    DebugApi::AmdDebugOutput,
];

/// Buffer placement hints some drivers report for every upload
const CORE_SUPPRESSED_IDS: [u32; 1] = [131185];

impl DebugApi {
    fn required(self) -> GraphicsFeatures {
        match self {
            DebugApi::Core43 => GraphicsFeatures::CORE_43,
            DebugApi::KhrDebug => GraphicsFeatures::KHR_DEBUG,
            DebugApi::ArbDebugOutput => GraphicsFeatures::ARB_DEBUG_OUTPUT,
            DebugApi::AmdDebugOutput => GraphicsFeatures::AMD_DEBUG_OUTPUT,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            DebugApi::Core43 => "OpenGL 4.3",
            DebugApi::KhrDebug => "KHR_debug",
            DebugApi::ArbDebugOutput => "ARB_debug_output",
            DebugApi::AmdDebugOutput => "AMD_debug_output",
        }
    }
}

/// Forward one driver message on the `gpu` target
pub fn forward(message: &DebugMessage) {
    match message.severity {
        DebugSeverity::High => tracing::error!(target: "gpu", id = message.id, "{}", message.text),
        DebugSeverity::Medium | DebugSeverity::Low => {
            tracing::warn!(target: "gpu", id = message.id, "{}", message.text)
        }
        DebugSeverity::Notification => {
            tracing::info!(target: "gpu", id = message.id, "{}", message.text)
        }
    }
}

/// First mechanism of the chain the context supports
pub fn select(features: GraphicsFeatures) -> Option<DebugApi> {
    DEBUG_CHAIN
        .into_iter()
        .find(|api| features.contains(api.required()))
}

/// Install the debug callback for the first supported mechanism
pub fn install(backend: &mut dyn GraphicsBackend, caps: &Capabilities) -> Option<DebugApi> {
    let Some(api) = select(caps.features) else {
        info!(target: "gpu", "No debug output implementation is available");
        return None;
    };

    info!(target: "gpu", "Using {} for error logging", api.describe());
    if let Err(e) = backend.install_debug_callback(api, Box::new(forward)) {
        warn!(target: "gpu", "Failed to install {} callback: {:#}", api.describe(), e);
        return None;
    }

    let debug_context = caps.features.contains(GraphicsFeatures::DEBUG_CONTEXT);
    match api {
        DebugApi::Core43 if !debug_context => {
            warn!(target: "gpu", "A non-debug context may not produce any debug output");
            backend.enable_debug_output(&CORE_SUPPRESSED_IDS);
        }
        // Context flags can only be queried on 3.0+
        DebugApi::KhrDebug
            if !debug_context && caps.features.contains(GraphicsFeatures::CORE_30) =>
        {
            warn!(target: "gpu", "A non-debug context may not produce any debug output");
            backend.enable_debug_output(&[]);
        }
        _ => {}
    }
    Some(api)
}
