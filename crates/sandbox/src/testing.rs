//! Ready-made guest modules in WebAssembly text format.
//!
//! Every guest exports `memory` and a bump `alloc` that grows memory on
//! demand. Constant payloads live in a data segment at [`DATA_OFFSET`].

use std::fmt::Write as _;

use serde_json::Value;

use crate::function::CompiledFunction;

/// Where constant payloads start in guest memory.
pub const DATA_OFFSET: usize = 16;

const WASM_PAGE: usize = 64 * 1024;

fn escape(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if b.is_ascii_graphic() && b != b'"' && b != b'\\' || b == b' ' {
            out.push(b as char);
        } else {
            let _ = write!(out, "\\{b:02x}");
        }
    }
    out
}

fn module(imports: &str, data: &[u8], body: &str) -> String {
    let heap = (DATA_OFFSET + data.len()).next_multiple_of(16).max(1024);
    format!(
        r#"(module
{imports}
  (memory (export "memory") 1)
  (global $heap (mut i32) (i32.const {heap}))
  (data (i32.const {DATA_OFFSET}) "{data}")
  (func $alloc (export "alloc") (param $len i32) (result i32)
    (local $p i32)
    (local $end i32)
    (local.set $p (global.get $heap))
    (local.set $end (i32.add (local.get $p) (local.get $len)))
    (if (i32.gt_u (local.get $end) (i32.mul (memory.size) (i32.const {WASM_PAGE})))
      (then
        (if (i32.eq
              (memory.grow
                (i32.add
                  (i32.div_u
                    (i32.sub (local.get $end) (i32.mul (memory.size) (i32.const {WASM_PAGE})))
                    (i32.const {WASM_PAGE}))
                  (i32.const 1)))
              (i32.const -1))
          (then unreachable))))
    (global.set $heap (local.get $end))
    (local.get $p))
  (func $pack (param $ptr i32) (param $len i32) (result i64)
    (i64.or
      (i64.shl (i64.extend_i32_u (local.get $ptr)) (i64.const 32))
      (i64.extend_i32_u (local.get $len))))
{body}
)"#,
        data = escape(data),
    )
}

fn json_bytes(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

/// `handle(event)` returns its input unchanged.
#[must_use]
pub fn identity() -> String {
    module(
        "",
        b"",
        r#"  (func (export "handle") (param $ptr i32) (param $len i32) (result i64)
    (call $pack (local.get $ptr) (local.get $len)))"#,
    )
}

/// `handle` ignores its input and returns `value`.
#[must_use]
pub fn constant(value: &Value) -> String {
    let data = json_bytes(value);
    module(
        "",
        &data,
        &format!(
            r#"  (func (export "handle") (param i32 i32) (result i64)
    (call $pack (i32.const {DATA_OFFSET}) (i32.const {len})))"#,
            len = data.len()
        ),
    )
}

/// `handle` returns nothing (`undefined`).
#[must_use]
pub fn returns_nothing() -> String {
    module(
        "",
        b"",
        r#"  (func (export "handle") (param i32 i32) (result i64)
    (i64.const 0))"#,
    )
}

/// `handle` throws `error`, a JSON error object or string.
#[must_use]
pub fn throwing(error: &Value) -> String {
    let data = json_bytes(error);
    module(
        r#"  (import "prelude" "throw" (func $throw (param i32 i32)))"#,
        &data,
        &format!(
            r#"  (func (export "handle") (param i32 i32) (result i64)
    (call $throw (i32.const {DATA_OFFSET}) (i32.const {len}))
    unreachable)"#,
            len = data.len()
        ),
    )
}

/// `handle` hits `unreachable`.
#[must_use]
pub fn trapping() -> String {
    module(
        "",
        b"",
        r#"  (func (export "handle") (param i32 i32) (result i64)
    unreachable)"#,
    )
}

/// `handle` never returns.
#[must_use]
pub fn spinning() -> String {
    module(
        "",
        b"",
        r#"  (func (export "handle") (param i32 i32) (result i64)
    (loop $forever (br $forever))
    (i64.const 0))"#,
    )
}

/// `handle` grows memory by `pages` and traps if that fails, then echoes
/// its input.
#[must_use]
pub fn growing(pages: u32) -> String {
    module(
        "",
        b"",
        &format!(
            r#"  (func (export "handle") (param $ptr i32) (param $len i32) (result i64)
    (if (i32.eq (memory.grow (i32.const {pages})) (i32.const -1))
      (then unreachable))
    (call $pack (local.get $ptr) (local.get $len)))"#
        ),
    )
}

/// `handle` logs `message` at `level` and echoes its input.
#[must_use]
pub fn logging(level: i32, message: &str) -> String {
    module(
        r#"  (import "prelude" "log" (func $log (param i32 i32 i32)))"#,
        message.as_bytes(),
        &format!(
            r#"  (func (export "handle") (param $ptr i32) (param $len i32) (result i64)
    (call $log (i32.const {level}) (i32.const {DATA_OFFSET}) (i32.const {len}))
    (call $pack (local.get $ptr) (local.get $len)))"#,
            len = message.len()
        ),
    )
}

/// Identity guest that also exports `meta()` returning `meta`.
#[must_use]
pub fn with_meta(meta: &Value) -> String {
    let data = json_bytes(meta);
    module(
        "",
        &data,
        &format!(
            r#"  (func (export "handle") (param $ptr i32) (param $len i32) (result i64)
    (call $pack (local.get $ptr) (local.get $len)))
  (func (export "meta") (result i64)
    (call $pack (i32.const {DATA_OFFSET}) (i32.const {len})))"#,
            len = data.len()
        ),
    )
}

/// `handle` performs `request` through `fetch` and returns the response.
#[must_use]
pub fn fetching(request: &Value) -> String {
    let data = json_bytes(request);
    module(
        r#"  (import "prelude" "fetch" (func $fetch (param i32 i32) (result i64)))"#,
        &data,
        &format!(
            r#"  (func (export "handle") (param i32 i32) (result i64)
    (call $fetch (i32.const {DATA_OFFSET}) (i32.const {len})))"#,
            len = data.len()
        ),
    )
}

/// `handle` stores `value` under `key`, optionally with `ttl`, and echoes
/// its input.
#[must_use]
pub fn storing(key: &str, value: &Value, ttl: Option<&Value>) -> String {
    let value = json_bytes(value);
    let ttl = ttl.map(json_bytes).unwrap_or_default();
    let mut data = key.as_bytes().to_vec();
    data.extend_from_slice(&value);
    data.extend_from_slice(&ttl);
    let value_at = DATA_OFFSET + key.len();
    let ttl_at = value_at + value.len();
    module(
        r#"  (import "prelude" "store_set" (func $store_set (param i32 i32 i32 i32 i32 i32)))"#,
        &data,
        &format!(
            r#"  (func (export "handle") (param $ptr i32) (param $len i32) (result i64)
    (call $store_set
      (i32.const {DATA_OFFSET}) (i32.const {key_len})
      (i32.const {value_at}) (i32.const {value_len})
      (i32.const {ttl_at}) (i32.const {ttl_len}))
    (call $pack (local.get $ptr) (local.get $len)))"#,
            key_len = key.len(),
            value_len = value.len(),
            ttl_len = ttl.len(),
        ),
    )
}

/// `handle` returns the stored value for `key`, or nothing.
#[must_use]
pub fn loading(key: &str) -> String {
    module(
        r#"  (import "prelude" "store_get" (func $store_get (param i32 i32) (result i64)))"#,
        key.as_bytes(),
        &format!(
            r#"  (func (export "handle") (param i32 i32) (result i64)
    (call $store_get (i32.const {DATA_OFFSET}) (i32.const {len})))"#,
            len = key.len()
        ),
    )
}

/// `handle` runs `request` (`{connectionId, sql, params}`) and returns the
/// rows.
#[must_use]
pub fn querying(request: &Value) -> String {
    let data = json_bytes(request);
    module(
        r#"  (import "prelude" "query" (func $query (param i32 i32) (result i64)))"#,
        &data,
        &format!(
            r#"  (func (export "handle") (param i32 i32) (result i64)
    (call $query (i32.const {DATA_OFFSET}) (i32.const {len})))"#,
            len = data.len()
        ),
    )
}

/// `handle` returns `hash(algorithm, data)`.
#[must_use]
pub fn hashing(algorithm: &str, data: &str) -> String {
    let mut bytes = algorithm.as_bytes().to_vec();
    bytes.extend_from_slice(data.as_bytes());
    module(
        r#"  (import "crypto" "hash" (func $hash (param i32 i32 i32 i32) (result i64)))"#,
        &bytes,
        &format!(
            r#"  (func (export "handle") (param i32 i32) (result i64)
    (call $hash
      (i32.const {DATA_OFFSET}) (i32.const {alg_len})
      (i32.const {data_at}) (i32.const {data_len})))"#,
            alg_len = algorithm.len(),
            data_at = DATA_OFFSET + algorithm.len(),
            data_len = data.len(),
        ),
    )
}

/// `handle` returns a random UUID.
#[must_use]
pub fn uuid() -> String {
    module(
        r#"  (import "crypto" "random_uuid" (func $random_uuid (result i64)))"#,
        b"",
        r#"  (func (export "handle") (param i32 i32) (result i64)
    (call $random_uuid))"#,
    )
}

/// `fold` drains the event stream and returns the last event.
#[must_use]
pub fn last_event() -> String {
    module(
        r#"  (import "prelude" "next_event" (func $next_event (result i64)))"#,
        b"",
        r#"  (func (export "fold") (param i32 i32) (result i64)
    (local $last i64)
    (local $cur i64)
    (block $done
      (loop $next
        (local.set $cur (call $next_event))
        (br_if $done (i64.eqz (local.get $cur)))
        (local.set $last (local.get $cur))
        (br $next)))
    (local.get $last))"#,
    )
}

/// `fold` returns the first event of the stream and ignores the rest.
#[must_use]
pub fn first_event() -> String {
    module(
        r#"  (import "prelude" "next_event" (func $next_event (result i64)))"#,
        b"",
        r#"  (func (export "fold") (param i32 i32) (result i64)
    (call $next_event))"#,
    )
}

/// `fold` returns the seed user state.
#[must_use]
pub fn user_state() -> String {
    module(
        r#"  (import "prelude" "user_state" (func $user_state (result i64)))"#,
        b"",
        r#"  (func (export "fold") (param i32 i32) (result i64)
    (call $user_state))"#,
    )
}

/// Guest importing `module.name`, which the host may not provide.
#[must_use]
pub fn importing(module_name: &str, name: &str) -> String {
    module(
        &format!(r#"  (import "{module_name}" "{name}" (func))"#),
        b"",
        r#"  (func (export "handle") (param $ptr i32) (param $len i32) (result i64)
    (call $pack (local.get $ptr) (local.get $len)))"#,
    )
}

/// Module without an allocator.
#[must_use]
pub fn without_alloc() -> String {
    r#"(module (memory (export "memory") 1))"#.to_owned()
}

/// Wrap WAT source as a function.
#[must_use]
pub fn function(id: &str, wat: String) -> CompiledFunction {
    CompiledFunction::new(id, id, wat.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn escapes_quotes_and_control_bytes() {
        assert_eq!(escape(br#"{"a":1}"#), r#"{\22a\22:1}"#);
        assert_eq!(escape(b"a\\b\n"), r"a\5cb\0a");
        assert_eq!(escape(b"a b"), "a b");
    }
}
