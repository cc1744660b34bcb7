use crate::runtime::environment::ExecutionEnvironment;
use crate::runtime::value::{DeviceId, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// The ambient state one round of evaluation runs against: the local
/// device identity, time and randomness sources, the lexical evaluation
/// stack, and the persistent variable store.
pub struct ExecutionContext {
    device: DeviceId,
    environment: Box<dyn ExecutionEnvironment>,
    rng: StdRng,
    frames: Vec<HashMap<String, Value>>,
}

impl ExecutionContext {
    pub fn new(device: DeviceId, environment: Box<dyn ExecutionEnvironment>) -> Self {
        Self {
            device,
            environment,
            rng: StdRng::from_entropy(),
            frames: vec![HashMap::new()],
        }
    }

    /// Deterministic randomness for simulations and tests.
    pub fn with_seed(device: DeviceId, environment: Box<dyn ExecutionEnvironment>, seed: u64) -> Self {
        Self {
            device,
            environment,
            rng: StdRng::seed_from_u64(seed),
            frames: vec![HashMap::new()],
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device
    }

    /// Seconds since the Unix epoch.
    pub fn current_time(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or(0.0)
    }

    pub fn next_random_double(&mut self) -> f64 {
        self.rng.gen()
    }

    pub fn push_frame(&mut self) {
        self.frames.push(HashMap::new());
    }

    pub fn pop_frame(&mut self) {
        self.frames.pop();
        // The base frame survives unbalanced pops.
        if self.frames.is_empty() {
            self.frames.push(HashMap::new());
        }
    }

    /// Binds a name in the innermost frame, shadowing any outer binding.
    pub fn bind(&mut self, name: &str, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.to_string(), value);
        }
    }

    /// Lexical lookup: innermost frame first, outer bindings remain
    /// visible until shadowed.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        for frame in self.frames.iter().rev() {
            if let Some(value) = frame.get(name) {
                return Some(value.clone());
            }
        }
        None
    }

    pub fn environment(&self) -> &dyn ExecutionEnvironment {
        self.environment.as_ref()
    }

    pub fn environment_mut(&mut self) -> &mut dyn ExecutionEnvironment {
        self.environment.as_mut()
    }
}
