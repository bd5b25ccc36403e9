use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, info};
use once_cell::unsync::OnceCell;

use crate::config::GlobalConfig;
use crate::entropy::SequenceOverride;
use crate::fractions::compute_fractions;
use crate::host::{Host, Routine};
use crate::schema::{derive_schema, DrawSchema};
use crate::state::StateStore;
use crate::value::Value;
use crate::{DeterminiserError, Result, TileCode};

/// Global left on the host after a successful install so a second install
/// finds the wrappers already in place.
const HOOK_MARKER: &str = "__determiniser_hooked__";

/// Field names of the host's rack object, known from offline analysis of
/// the bundle. These are configuration, not discovery.
#[derive(Debug, Clone)]
pub struct RackFields {
    pub capacity: String,
    pub codes: String,
    pub slots: String,
    pub flags: String,
}

/// What the engine needs to know about a host: the names of the entry
/// points to wrap, the rack layout, and the global holding the empty-slot
/// marker code, if the host has one.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub draw_fn: String,
    pub refill_fn: String,
    pub helper_fn: String,
    pub rack: RackFields,
    pub empty_code_global: Option<String>,
}

struct EngineShared {
    config: Rc<RefCell<GlobalConfig>>,
    store: StateStore,
    settings: EngineSettings,
    schema: OnceCell<Option<DrawSchema>>,
}

/// Installs and coordinates the interception points over one host. The
/// schema cache and pool table live here, so an engine instance drives
/// exactly one host.
pub struct Engine {
    shared: Rc<EngineShared>,
}

impl Engine {
    pub fn new(config: Rc<RefCell<GlobalConfig>>, settings: EngineSettings) -> Engine {
        Engine {
            shared: Rc::new(EngineShared {
                config,
                store: StateStore::new(),
                settings,
                schema: OnceCell::new(),
            }),
        }
    }

    /// Wraps the host's entry points in place. Returns false without
    /// touching anything when a previous install is detected. The draw
    /// routine must exist; the refill and helper hooks are skipped quietly
    /// when the host lacks them.
    pub fn install(&self, host: &Host) -> Result<bool> {
        if host.global(HOOK_MARKER).map(|v| v.is_truthy()).unwrap_or(false) {
            return Ok(false);
        }
        let settings = &self.shared.settings;
        let draw = host
            .routine(&settings.draw_fn)
            .ok_or_else(|| DeterminiserError::MissingRoutine {
                name: settings.draw_fn.clone(),
            })?;

        host.define(wrap_draw(Rc::clone(&self.shared), Rc::clone(&draw)));
        info!("hooked draw routine '{}'", settings.draw_fn);

        match host.routine(&settings.refill_fn) {
            Some(refill) => {
                host.define(wrap_refill(Rc::clone(&self.shared), refill, Rc::clone(&draw)));
                info!("hooked refill routine '{}'", settings.refill_fn);
            }
            None => debug!("host has no refill routine '{}'", settings.refill_fn),
        }

        match host.routine(&settings.helper_fn) {
            Some(helper) => {
                host.define(wrap_helper(Rc::clone(&self.shared), helper, Rc::clone(&draw)));
                info!("hooked helper routine '{}'", settings.helper_fn);
            }
            None => debug!("host has no helper routine '{}'", settings.helper_fn),
        }

        host.set_global(HOOK_MARKER, Value::Num(1.0));
        Ok(true)
    }
}

/// The schema is derived once per engine, from the draw routine's source,
/// the first time any wrapper needs it.
fn schema_for<'a>(shared: &'a EngineShared, draw: &Rc<Routine>) -> Option<&'a DrawSchema> {
    shared
        .schema
        .get_or_init(|| {
            let schema = draw.source().and_then(derive_schema);
            if schema.is_none() {
                debug!("no schema recovered from '{}'; optimized paths stay off", draw.name());
            }
            schema
        })
        .as_ref()
}

fn wrap_draw(shared: Rc<EngineShared>, original: Rc<Routine>) -> Rc<Routine> {
    let name = original.name().to_string();
    Routine::new(&name, move |host, args| {
        let outcome = forced_draw(&shared, &original, host, args).and_then(|forced| match forced {
            Some(v) => Ok(v),
            None => original.call(host, args),
        });
        match outcome {
            Ok(v) => Ok(v),
            Err(e) => {
                debug!("draw interception failed ({e}); retrying the original unmodified");
                original.call(host, args)
            }
        }
    })
}

/// One steered draw. `Ok(None)` means nothing applied and the caller runs
/// the original as-is.
fn forced_draw(
    shared: &EngineShared,
    original: &Rc<Routine>,
    host: &Host,
    args: &[Value],
) -> Result<Option<Value>> {
    let bag = match args.first() {
        Some(v @ Value::Obj(_)) => v.clone(),
        _ => return Ok(None),
    };
    let store = &shared.store;

    // An active replenish whose queue has run out means the remaining rack
    // slots stay empty: report exhaustion before anything else can reseed.
    if store.is_refilling(&bag) && store.queue_is_empty(&bag) {
        return Ok(Some(Value::Null));
    }

    {
        let config = shared.config.borrow();
        store.reseed_if_stale(&bag, config.desired(), config.epoch());
    }

    let code = match store.pop_desired(&bag) {
        Some(code) => code,
        None => return Ok(None),
    };
    let schema = match schema_for(shared, original) {
        Some(schema) => schema,
        None => return Ok(None), // the popped target is given up to randomness
    };

    if let Some(picked) = take_specific(host, &bag, code, schema) {
        if picked.is_truthy() {
            return Ok(Some(picked));
        }
    }

    // Not in the pool, or the take came back falsy: conjure the tile
    // through the wrapper so the user still gets it.
    if let Some(wrapper) = schema.wrapper.as_deref() {
        if host.routine(wrapper).is_some() {
            decrement_first_match(&bag, code, schema);
            return host.call(wrapper, vec![Value::from(code)]).map(Some);
        }
    }
    Ok(None)
}

/// Removes one unit of `code` from the pool and wraps it, mirroring what
/// one host draw would have done. `None` when the wrapper is missing, the
/// pool has no such entry in stock, or the wrapper call fails.
fn take_specific(host: &Host, bag: &Value, code: TileCode, schema: &DrawSchema) -> Option<Value> {
    let wrapper = schema.wrapper.as_deref()?;
    // Resolve before touching any counts so a missing wrapper mutates
    // nothing.
    host.routine(wrapper)?;
    let entries = bag.get(&schema.array_field)?;
    let len = entries.arr_len()?;
    for i in 0..len {
        let entry = entries.arr_get(i)?;
        let matches = entry.get(&schema.value_field).and_then(|v| v.code()) == Some(code);
        let in_stock = entry.get(&schema.count_field).and_then(|v| v.int()).unwrap_or(0) > 0;
        if !(matches && in_stock) {
            continue;
        }
        entry.add_num(&schema.count_field, -1.0);
        if let Some(total_field) = schema.total_field.as_deref() {
            bag.add_num(total_field, -1.0);
        }
        return host.call(wrapper, vec![Value::from(code)]).ok();
    }
    None
}

/// Best-effort debit before a conjure, so the pool keeps rough book on the
/// extra tile. The total is only touched while still positive.
fn decrement_first_match(bag: &Value, code: TileCode, schema: &DrawSchema) {
    let entries = match bag.get(&schema.array_field) {
        Some(entries) => entries,
        None => return,
    };
    let len = match entries.arr_len() {
        Some(len) => len,
        None => return,
    };
    for i in 0..len {
        let entry = match entries.arr_get(i) {
            Some(entry) => entry,
            None => return,
        };
        let matches = entry.get(&schema.value_field).and_then(|v| v.code()) == Some(code);
        let in_stock = entry.get(&schema.count_field).and_then(|v| v.int()).unwrap_or(0) > 0;
        if !(matches && in_stock) {
            continue;
        }
        entry.add_num(&schema.count_field, -1.0);
        if let Some(total_field) = schema.total_field.as_deref() {
            if bag.get(total_field).and_then(|v| v.int()).unwrap_or(0) > 0 {
                bag.add_num(total_field, -1.0);
            }
        }
        return;
    }
}

fn wrap_refill(shared: Rc<EngineShared>, original: Rc<Routine>, draw: Rc<Routine>) -> Rc<Routine> {
    let name = original.name().to_string();
    Routine::new(&name, move |host, args| {
        match steered_refill(&shared, &original, &draw, host, args) {
            Ok(Some(v)) => Ok(v),
            Ok(None) => original.call(host, args),
            Err(e) => {
                debug!("refill interception failed ({e}); retrying the original unmodified");
                original.call(host, args)
            }
        }
    })
}

fn steered_refill(
    shared: &EngineShared,
    original: &Rc<Routine>,
    draw: &Rc<Routine>,
    host: &Host,
    args: &mut Vec<Value>,
) -> Result<Option<Value>> {
    let bag = match args.first() {
        Some(v @ Value::Obj(_)) => v.clone(),
        _ => return Ok(None),
    };
    let (desired, epoch) = {
        let config = shared.config.borrow();
        (config.desired().to_vec(), config.epoch())
    };
    shared.store.seed(&bag, &desired, epoch);

    if desired.is_empty() {
        // An empty sequence means an empty rack. Clear it up front; the
        // suppressed draws below keep it that way.
        if let Some(rack) = args.get(1).cloned() {
            blank_rack(host, &rack, &shared.settings);
        }
    }

    let schema = schema_for(shared, draw);
    let fractions = compute_fractions(&bag, &desired, schema, Some(desired.len()));

    shared.store.set_refilling(&bag, true);
    let result = {
        let _guard = SequenceOverride::install(host.entropy(), fractions);
        original.call(host, args)
    };
    shared.store.set_refilling(&bag, false);
    Ok(Some(result?))
}

fn wrap_helper(shared: Rc<EngineShared>, original: Rc<Routine>, draw: Rc<Routine>) -> Rc<Routine> {
    let name = original.name().to_string();
    Routine::new(&name, move |host, args| {
        match steered_helper(&shared, &original, &draw, host, args) {
            Ok(Some(v)) => Ok(v),
            Ok(None) => original.call(host, args),
            Err(e) => {
                debug!("helper interception failed ({e}); retrying the original unmodified");
                original.call(host, args)
            }
        }
    })
}

fn steered_helper(
    shared: &EngineShared,
    original: &Rc<Routine>,
    draw: &Rc<Routine>,
    host: &Host,
    args: &mut Vec<Value>,
) -> Result<Option<Value>> {
    let bag = match args.get(1) {
        Some(v @ Value::Obj(_)) => v.clone(),
        _ => return Ok(None),
    };
    {
        let config = shared.config.borrow();
        shared.store.reseed_if_stale(&bag, config.desired(), config.epoch());
    }

    // The queue is read, not drained: the helper consumes the substituted
    // text instead of popping targets one by one.
    let queue = shared.store.queue_snapshot(&bag);
    let text: String = queue
        .iter()
        .filter_map(|&code| char::from_u32(u32::from(code)))
        .collect();
    while args.len() <= 2 {
        args.push(Value::Null);
    }
    args[2] = Value::Str(text);

    let schema = schema_for(shared, draw);
    let fractions = compute_fractions(&bag, &queue, schema, Some(queue.len()));

    shared.store.set_refilling(&bag, true);
    let result = {
        let _guard = SequenceOverride::install(host.entropy(), fractions);
        original.call(host, args)
    };
    shared.store.set_refilling(&bag, false);
    Ok(Some(result?))
}

/// Writes the empty-slot marker into every rack position, within the
/// bounds each backing array actually has.
fn blank_rack(host: &Host, rack: &Value, settings: &EngineSettings) {
    let fields = &settings.rack;
    let capacity = match rack.get(&fields.capacity).and_then(|v| v.int()) {
        Some(n) if n > 0 => n as usize,
        _ => return,
    };
    let empty_code = settings
        .empty_code_global
        .as_deref()
        .and_then(|name| host.global(name))
        .and_then(|v| v.num())
        .unwrap_or(0.0);
    let codes = rack.get(&fields.codes);
    let slots = rack.get(&fields.slots);
    let flags = rack.get(&fields.flags);
    for i in 0..capacity {
        if let Some(codes) = &codes {
            codes.arr_set(i, Value::Num(empty_code));
        }
        if let Some(slots) = &slots {
            slots.arr_set(i, Value::Num(-1.0));
        }
        if let Some(flags) = &flags {
            flags.arr_set(i, Value::Num(0.0));
        }
    }
}
