use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::entropy::EntropySlot;
use crate::value::Value;
use crate::{DeterminiserError, Result};

type NativeFn = dyn Fn(&Host, &mut Vec<Value>) -> Result<Value>;

/// A callable the host exposes through its global table. Routines that
/// came out of a minified bundle also carry their literal source text,
/// which is what schema discovery reads.
pub struct Routine {
    name: String,
    source: Option<String>,
    body: Box<NativeFn>,
}

impl Routine {
    pub fn new<F>(name: &str, body: F) -> Rc<Routine>
    where
        F: Fn(&Host, &mut Vec<Value>) -> Result<Value> + 'static,
    {
        Rc::new(Routine {
            name: name.to_string(),
            source: None,
            body: Box::new(body),
        })
    }

    pub fn with_source<F>(name: &str, source: &str, body: F) -> Rc<Routine>
    where
        F: Fn(&Host, &mut Vec<Value>) -> Result<Value> + 'static,
    {
        Rc::new(Routine {
            name: name.to_string(),
            source: Some(source.to_string()),
            body: Box::new(body),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Literal source text, when the runtime exposes one. Wrappers built at
    /// runtime have none.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn call(&self, host: &Host, args: &mut Vec<Value>) -> Result<Value> {
        (self.body)(host, args)
    }
}

impl fmt::Debug for Routine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Routine")
            .field("name", &self.name)
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

/// The opaque program being steered: a global table of values and routines
/// plus the entropy slot its draws consume. The engine only ever touches it
/// through this surface.
pub struct Host {
    globals: RefCell<HashMap<String, Value>>,
    entropy: EntropySlot,
}

impl Host {
    pub fn new(seed: Option<u64>) -> Host {
        Host {
            globals: RefCell::new(HashMap::new()),
            entropy: EntropySlot::new(seed),
        }
    }

    pub fn entropy(&self) -> &EntropySlot {
        &self.entropy
    }

    /// Next ambient entropy value in [0, 1). Host routines draw through
    /// this, which is what a sequence override intercepts.
    pub fn random(&self) -> f64 {
        self.entropy.next()
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.borrow().get(name).cloned()
    }

    pub fn set_global(&self, name: &str, v: Value) {
        self.globals.borrow_mut().insert(name.to_string(), v);
    }

    pub fn routine(&self, name: &str) -> Option<Rc<Routine>> {
        self.global(name).and_then(|v| v.routine())
    }

    pub fn define(&self, routine: Rc<Routine>) {
        let name = routine.name().to_string();
        self.set_global(&name, Value::Fn(routine));
    }

    /// Dispatches through the global table by name, the way the host
    /// resolves its own top-level calls. A wrapper installed under the same
    /// name therefore intercepts the host's internal calls too.
    pub fn call(&self, name: &str, mut args: Vec<Value>) -> Result<Value> {
        let routine = self
            .routine(name)
            .ok_or_else(|| DeterminiserError::MissingRoutine { name: name.to_string() })?;
        routine.call(self, &mut args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_dispatches_through_the_current_table_entry() {
        let host = Host::new(Some(1));
        host.define(Routine::new("f", |_, _| Ok(Value::Num(1.0))));
        assert_eq!(host.call("f", vec![]).unwrap(), Value::Num(1.0));

        // Redefining under the same name reroutes callers that go by name.
        host.define(Routine::new("f", |_, _| Ok(Value::Num(2.0))));
        assert_eq!(host.call("f", vec![]).unwrap(), Value::Num(2.0));
    }

    #[test]
    fn inner_calls_by_name_see_the_replacement() {
        let host = Host::new(Some(1));
        host.define(Routine::new("leaf", |_, _| Ok(Value::Num(1.0))));
        host.define(Routine::new("outer", |h, _| h.call("leaf", vec![])));
        host.define(Routine::new("leaf", |_, _| Ok(Value::Num(9.0))));
        assert_eq!(host.call("outer", vec![]).unwrap(), Value::Num(9.0));
    }

    #[test]
    fn missing_routine_is_an_error() {
        let host = Host::new(Some(1));
        let err = host.call("absent", vec![]).unwrap_err();
        assert!(matches!(
            err,
            crate::DeterminiserError::MissingRoutine { ref name } if name == "absent"
        ));
    }

    #[test]
    fn args_are_passed_by_mutable_reference() {
        let host = Host::new(Some(1));
        host.define(Routine::new("grow", |_, args| {
            args.push(Value::Num(5.0));
            Ok(Value::Null)
        }));
        let routine = host.routine("grow").unwrap();
        let mut args = vec![Value::Num(1.0)];
        routine.call(&host, &mut args).unwrap();
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn random_consumes_the_entropy_slot() {
        let host = Host::new(Some(99));
        let slot = EntropySlot::new(Some(99));
        assert_eq!(host.random(), slot.next());
    }
}
