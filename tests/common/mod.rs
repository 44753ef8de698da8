#![allow(dead_code)]

use std::error::Error;

use jobengine::exec::PayloadRegistry;
use jobengine_test_utils::fake_payload::{Behaviour, Recorder, ScriptedPayload};

pub use jobengine_test_utils::builders::{TestCluster, fast_settings};
pub use jobengine_test_utils::{eventually, init_tracing, with_timeout};

pub type TestResult = Result<(), Box<dyn Error>>;

/// Registry of scripted builtins sharing one recorder.
pub fn scripted(entries: &[(&str, Behaviour)], recorder: &Recorder) -> PayloadRegistry {
    let mut registry = PayloadRegistry::new();
    for (name, behaviour) in entries {
        registry.register(*name, ScriptedPayload::new(behaviour.clone(), recorder));
    }
    registry
}
