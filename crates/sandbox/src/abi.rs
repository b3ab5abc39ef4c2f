//! Guest calling convention.
//!
//! Values cross the boundary as JSON copies. The host writes into guest
//! memory through the guest's `alloc(len) -> ptr` export; both directions
//! describe a buffer as a packed `i64` of `ptr << 32 | len`, with `0`
//! meaning "no value".

use anyhow::{Context, anyhow};
use wasmtime::{AsContext, AsContextMut, Memory, TypedFunc};

use crate::host::HostState;

/// Export every guest must provide: its linear memory.
pub const MEMORY_EXPORT: &str = "memory";
/// Export every guest must provide: `alloc(len) -> ptr`.
pub const ALLOC_EXPORT: &str = "alloc";
/// Per-event entry point: `handle(event, context) -> packed`.
pub const HANDLE_EXPORT: &str = "handle";
/// Stream-fold entry point: `fold(context) -> packed`.
pub const FOLD_EXPORT: &str = "fold";
/// Optional metadata export: `meta() -> packed`.
pub const META_EXPORT: &str = "meta";

/// Pack a buffer location.
#[must_use]
pub const fn pack(ptr: u32, len: u32) -> i64 {
    (((ptr as u64) << 32) | len as u64) as i64
}

/// Unpack a buffer location.
#[must_use]
pub const fn unpack(packed: i64) -> (u32, u32) {
    let raw = packed as u64;
    ((raw >> 32) as u32, (raw & 0xffff_ffff) as u32)
}

/// Memory and allocator of one guest instance.
#[derive(Clone)]
pub(crate) struct GuestMemory {
    pub(crate) memory: Memory,
    pub(crate) alloc: TypedFunc<i32, i32>,
}

impl GuestMemory {
    /// Copy `len` bytes out of the guest.
    pub(crate) fn read(
        &self,
        ctx: impl AsContext,
        ptr: u32,
        len: u32,
        max_len: usize,
    ) -> anyhow::Result<Vec<u8>> {
        let len = len as usize;
        if len > max_len {
            return Err(anyhow!("guest payload of {len} bytes exceeds {max_len}"));
        }
        let mut buf = vec![0_u8; len];
        self.memory
            .read(ctx, ptr as usize, &mut buf)
            .context("guest pointer out of bounds")?;
        Ok(buf)
    }

    /// Read a UTF-8 string.
    pub(crate) fn read_str(
        &self,
        ctx: impl AsContext,
        ptr: u32,
        len: u32,
        max_len: usize,
    ) -> anyhow::Result<String> {
        String::from_utf8(self.read(ctx, ptr, len, max_len)?).context("guest string is not UTF-8")
    }

    /// Read a packed JSON value; `0` is `None`.
    pub(crate) fn read_json(
        &self,
        ctx: impl AsContext,
        packed: i64,
        max_len: usize,
    ) -> anyhow::Result<Option<serde_json::Value>> {
        if packed == 0 {
            return Ok(None);
        }
        let (ptr, len) = unpack(packed);
        let bytes = self.read(ctx, ptr, len, max_len)?;
        let value = serde_json::from_slice(&bytes).context("guest returned invalid JSON")?;
        Ok(Some(value))
    }

    /// Allocate in the guest and copy `bytes` in. Returns the packed location.
    pub(crate) async fn write<C>(&self, ctx: &mut C, bytes: &[u8]) -> anyhow::Result<i64>
    where
        C: AsContextMut<Data = HostState>,
    {
        let len = i32::try_from(bytes.len()).context("payload too large for the guest")?;
        let ptr = self.alloc.call_async(&mut *ctx, len).await?;
        self.memory
            .write(&mut *ctx, ptr as u32 as usize, bytes)
            .context("guest allocator returned an out-of-bounds pointer")?;
        Ok(pack(ptr as u32, len as u32))
    }

    /// Serialise `value` and copy it into the guest.
    pub(crate) async fn write_json<C>(
        &self,
        ctx: &mut C,
        value: &serde_json::Value,
    ) -> anyhow::Result<i64>
    where
        C: AsContextMut<Data = HostState>,
    {
        let bytes = serde_json::to_vec(value)?;
        self.write(ctx, &bytes).await
    }
}
