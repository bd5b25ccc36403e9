use crate::host::{Host, Routine};
use crate::intercept::{EngineSettings, RackFields};
use crate::value::Value;
use crate::{DeterminiserError, Result, TileCode, BLANK_CODE};

// Names as they appear in the bundle build this host mimics.
pub const DRAW_FN: &str = "Iv";
pub const WRAP_FN: &str = "Tv";
pub const REFILL_FN: &str = "Vv";
pub const HELPER_FN: &str = "Qv";
pub const EMPTY_CODE_GLOBAL: &str = "osb";

pub const ARRAY_FIELD: &str = "xb";
pub const VALUE_FIELD: &str = "Hb";
pub const COUNT_FIELD: &str = "v";
pub const TOTAL_FIELD: &str = "fc";

pub const RACK_CAPACITY: &str = "Zb";
pub const RACK_CODES: &str = "Eb";
pub const RACK_SLOTS: &str = "jb";
pub const RACK_FLAGS: &str = "ub";

const CTX_RACK_FIELD: &str = "rk";
const CTX_EXTRA_FIELD: &str = "pn";

/// The draw routine's text as the bundle carries it. The native body below
/// implements exactly this.
pub const IV_SOURCE: &str = "function Iv(a){var b,c;if(0==a.fc)return null;for(b=Math.floor(Lv()*a.fc),c=0;;c++){if(b<a.xb[c].v){--a.xb[c].v;--a.fc;return Tv(a.xb[c].Hb)}b-=a.xb[c].v}}";

pub struct TileSpec {
    pub letter: char,
    pub count: u8,
}

/// The standard 100-tile English distribution.
pub const TILE_DISTRIBUTION: &[TileSpec] = &[
    TileSpec { letter: 'A', count: 9 },
    TileSpec { letter: 'B', count: 2 },
    TileSpec { letter: 'C', count: 2 },
    TileSpec { letter: 'D', count: 4 },
    TileSpec { letter: 'E', count: 12 },
    TileSpec { letter: 'F', count: 2 },
    TileSpec { letter: 'G', count: 3 },
    TileSpec { letter: 'H', count: 2 },
    TileSpec { letter: 'I', count: 9 },
    TileSpec { letter: 'J', count: 1 },
    TileSpec { letter: 'K', count: 1 },
    TileSpec { letter: 'L', count: 4 },
    TileSpec { letter: 'M', count: 2 },
    TileSpec { letter: 'N', count: 6 },
    TileSpec { letter: 'O', count: 8 },
    TileSpec { letter: 'P', count: 2 },
    TileSpec { letter: 'Q', count: 1 },
    TileSpec { letter: 'R', count: 6 },
    TileSpec { letter: 'S', count: 4 },
    TileSpec { letter: 'T', count: 6 },
    TileSpec { letter: 'U', count: 4 },
    TileSpec { letter: 'V', count: 2 },
    TileSpec { letter: 'W', count: 2 },
    TileSpec { letter: 'X', count: 1 },
    TileSpec { letter: 'Y', count: 2 },
    TileSpec { letter: 'Z', count: 1 },
    TileSpec { letter: '?', count: 2 },
];

/// A host wired up the way the targeted bundle is: the draw carries its
/// source text, the refill draws through the global table, the helper
/// fills a rack from override text. Used by the command line tool and the
/// test suite.
pub fn reference_host(seed: Option<u64>) -> Host {
    let host = Host::new(seed);
    host.set_global(EMPTY_CODE_GLOBAL, Value::Num(0.0));
    host.define(Routine::with_source(DRAW_FN, IV_SOURCE, native_draw));
    host.define(Routine::new(WRAP_FN, native_wrap));
    host.define(Routine::new(REFILL_FN, native_refill));
    host.define(Routine::new(HELPER_FN, native_helper));
    host
}

/// Engine settings matching [`reference_host`].
pub fn engine_settings() -> EngineSettings {
    EngineSettings {
        draw_fn: DRAW_FN.to_string(),
        refill_fn: REFILL_FN.to_string(),
        helper_fn: HELPER_FN.to_string(),
        rack: RackFields {
            capacity: RACK_CAPACITY.to_string(),
            codes: RACK_CODES.to_string(),
            slots: RACK_SLOTS.to_string(),
            flags: RACK_FLAGS.to_string(),
        },
        empty_code_global: Some(EMPTY_CODE_GLOBAL.to_string()),
    }
}

pub fn standard_bag() -> Value {
    let pairs: Vec<(char, i64)> = TILE_DISTRIBUTION
        .iter()
        .map(|tile| (tile.letter, i64::from(tile.count)))
        .collect();
    custom_bag(&pairs)
}

pub fn custom_bag(entries: &[(char, i64)]) -> Value {
    let mut total = 0;
    let items: Vec<Value> = entries
        .iter()
        .map(|&(letter, count)| {
            total += count;
            let entry = Value::object();
            entry.set(VALUE_FIELD, Value::Num(f64::from(letter as u32)));
            entry.set(COUNT_FIELD, Value::Num(count as f64));
            entry
        })
        .collect();
    let bag = Value::object();
    bag.set(ARRAY_FIELD, Value::array(items));
    bag.set(TOTAL_FIELD, Value::Num(total as f64));
    bag
}

/// A rack with every slot free: codes at the empty marker and board slots
/// at -1, with placement flags down.
pub fn new_rack(capacity: usize) -> Value {
    let rack = Value::object();
    rack.set(RACK_CAPACITY, Value::Num(capacity as f64));
    rack.set(RACK_CODES, Value::array(vec![Value::Num(0.0); capacity]));
    rack.set(RACK_SLOTS, Value::array(vec![Value::Num(-1.0); capacity]));
    rack.set(RACK_FLAGS, Value::array(vec![Value::Num(0.0); capacity]));
    rack
}

/// The rack's letters as text, '.' for anything that is not a tile.
pub fn rack_letters(rack: &Value) -> String {
    let codes = match rack.get(RACK_CODES) {
        Some(codes) => codes,
        None => return String::new(),
    };
    let len = codes.arr_len().unwrap_or(0);
    (0..len)
        .map(|i| match codes.arr_get(i).and_then(|v| v.code()) {
            Some(code)
                if (b'A' as TileCode..=b'Z' as TileCode).contains(&code)
                    || code == BLANK_CODE =>
            {
                char::from_u32(u32::from(code)).unwrap_or('.')
            }
            _ => '.',
        })
        .collect()
}

pub fn bag_total(bag: &Value) -> i64 {
    bag.get(TOTAL_FIELD).and_then(|v| v.int()).unwrap_or(0)
}

pub fn tile_count(bag: &Value, letter: char) -> i64 {
    let code = match u16::try_from(letter as u32) {
        Ok(code) => code,
        Err(_) => return 0,
    };
    let entries = match bag.get(ARRAY_FIELD) {
        Some(entries) => entries,
        None => return 0,
    };
    let len = entries.arr_len().unwrap_or(0);
    for i in 0..len {
        if let Some(entry) = entries.arr_get(i) {
            if entry.get(VALUE_FIELD).and_then(|v| v.code()) == Some(code) {
                return entry.get(COUNT_FIELD).and_then(|v| v.int()).unwrap_or(0);
            }
        }
    }
    0
}

/// Cumulative-weight inversion over the pool: one uniform value scaled by
/// the total walks the per-entry counts. Takes the selected tile out of
/// the pool and hands its code to the wrapper through the global table.
pub(crate) fn native_draw(host: &Host, args: &mut Vec<Value>) -> Result<Value> {
    let bag = match args.first() {
        Some(v @ Value::Obj(_)) => v.clone(),
        _ => {
            return Err(DeterminiserError::HostCall {
                name: DRAW_FN.to_string(),
                message: "draw needs a pool object".to_string(),
            })
        }
    };
    let total = bag.get(TOTAL_FIELD).and_then(|v| v.int()).unwrap_or(0);
    if total == 0 {
        return Ok(Value::Null);
    }
    let mut k = (host.random() * total as f64).floor() as i64;
    let entries = match bag.get(ARRAY_FIELD) {
        Some(entries) => entries,
        None => {
            return Err(DeterminiserError::HostCall {
                name: DRAW_FN.to_string(),
                message: "pool has no tile list".to_string(),
            })
        }
    };
    let len = entries.arr_len().unwrap_or(0);
    for i in 0..len {
        let entry = match entries.arr_get(i) {
            Some(entry) => entry,
            None => break,
        };
        let count = entry.get(COUNT_FIELD).and_then(|v| v.int()).unwrap_or(0);
        if k < count {
            entry.add_num(COUNT_FIELD, -1.0);
            bag.add_num(TOTAL_FIELD, -1.0);
            return host.call(WRAP_FN, vec![entry.get(VALUE_FIELD).unwrap_or(Value::Null)]);
        }
        k -= count;
    }
    Ok(Value::Null)
}

pub(crate) fn native_wrap(_host: &Host, args: &mut Vec<Value>) -> Result<Value> {
    let tile = Value::object();
    tile.set(VALUE_FIELD, args.first().cloned().unwrap_or(Value::Null));
    Ok(tile)
}

/// Tops up the rack's free slots, one table-dispatched draw per slot,
/// stopping at the first falsy tile.
pub(crate) fn native_refill(host: &Host, args: &mut Vec<Value>) -> Result<Value> {
    let (bag, rack) = match (args.first(), args.get(1)) {
        (Some(b @ Value::Obj(_)), Some(r @ Value::Obj(_))) => (b.clone(), r.clone()),
        _ => {
            return Err(DeterminiserError::HostCall {
                name: REFILL_FN.to_string(),
                message: "refill needs a pool and a rack".to_string(),
            })
        }
    };
    let capacity = rack
        .get(RACK_CAPACITY)
        .and_then(|v| v.int())
        .unwrap_or(0)
        .max(0) as usize;
    let codes = rack.get(RACK_CODES);
    let slots = rack.get(RACK_SLOTS);
    let flags = rack.get(RACK_FLAGS);
    let mut filled = 0.0;
    for i in 0..capacity {
        let occupied = slots
            .as_ref()
            .and_then(|s| s.arr_get(i))
            .and_then(|v| v.int())
            .unwrap_or(-1)
            != -1;
        if occupied {
            continue;
        }
        let tile = host.call(DRAW_FN, vec![bag.clone()])?;
        if !tile.is_truthy() {
            break;
        }
        if let Some(codes) = &codes {
            codes.arr_set(i, tile.get(VALUE_FIELD).unwrap_or(Value::Null));
        }
        if let Some(slots) = &slots {
            slots.arr_set(i, Value::Num(i as f64));
        }
        if let Some(flags) = &flags {
            flags.arr_set(i, Value::Num(1.0));
        }
        filled += 1.0;
    }
    Ok(Value::Num(filled))
}

/// Rebuilds the rack held by the context object from the override text,
/// debiting the pool where it can, and blanks the positions the text does
/// not cover.
fn native_helper(host: &Host, args: &mut Vec<Value>) -> Result<Value> {
    let (ctx, bag) = match (args.first(), args.get(1)) {
        (Some(c @ Value::Obj(_)), Some(b @ Value::Obj(_))) => (c.clone(), b.clone()),
        _ => {
            return Err(DeterminiserError::HostCall {
                name: HELPER_FN.to_string(),
                message: "helper needs a context and a pool".to_string(),
            })
        }
    };
    let text = args
        .get(2)
        .and_then(|v| v.text().map(str::to_string))
        .unwrap_or_default();
    ctx.set(CTX_EXTRA_FIELD, args.get(3).cloned().unwrap_or(Value::Null));
    let rack = match ctx.get(CTX_RACK_FIELD) {
        Some(r @ Value::Obj(_)) => r,
        _ => {
            return Err(DeterminiserError::HostCall {
                name: HELPER_FN.to_string(),
                message: "context has no rack".to_string(),
            })
        }
    };
    let capacity = rack
        .get(RACK_CAPACITY)
        .and_then(|v| v.int())
        .unwrap_or(0)
        .max(0) as usize;
    let wanted: Vec<TileCode> = text
        .chars()
        .filter_map(|c| u16::try_from(c as u32).ok())
        .collect();
    let empty = host
        .global(EMPTY_CODE_GLOBAL)
        .and_then(|v| v.num())
        .unwrap_or(0.0);
    let codes = rack.get(RACK_CODES);
    let slots = rack.get(RACK_SLOTS);
    let flags = rack.get(RACK_FLAGS);
    let mut placed = 0.0;
    for i in 0..capacity {
        match wanted.get(i) {
            Some(&code) => {
                take_one(&bag, code);
                if let Some(codes) = &codes {
                    codes.arr_set(i, Value::from(code));
                }
                if let Some(slots) = &slots {
                    slots.arr_set(i, Value::Num(i as f64));
                }
                if let Some(flags) = &flags {
                    flags.arr_set(i, Value::Num(1.0));
                }
                placed += 1.0;
            }
            None => {
                if let Some(codes) = &codes {
                    codes.arr_set(i, Value::Num(empty));
                }
                if let Some(slots) = &slots {
                    slots.arr_set(i, Value::Num(-1.0));
                }
                if let Some(flags) = &flags {
                    flags.arr_set(i, Value::Num(0.0));
                }
            }
        }
    }
    Ok(Value::Num(placed))
}

fn take_one(bag: &Value, code: TileCode) {
    let entries = match bag.get(ARRAY_FIELD) {
        Some(entries) => entries,
        None => return,
    };
    let len = entries.arr_len().unwrap_or(0);
    for i in 0..len {
        let entry = match entries.arr_get(i) {
            Some(entry) => entry,
            None => return,
        };
        let matches = entry.get(VALUE_FIELD).and_then(|v| v.code()) == Some(code);
        let in_stock = entry.get(COUNT_FIELD).and_then(|v| v.int()).unwrap_or(0) > 0;
        if matches && in_stock {
            entry.add_num(COUNT_FIELD, -1.0);
            bag.add_num(TOTAL_FIELD, -1.0);
            return;
        }
    }
}
