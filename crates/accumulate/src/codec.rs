//! Durable representation of a `MultiAccumulate`.
//!
//! Layout (little-endian):
//!
//! ```text
//! magic "KACC" | version u8
//! required bindings: u32 count, then each binding
//! source pattern (recursive)
//! slot count u32, then per slot:
//!     0x00                    absent: compiled or unwired, re-wire after restore
//!     0x01 descriptor         relocatable built-in
//!     0x02 descriptor         relocatable built-in behind the guard
//! ```
//!
//! A binding is `identifier (u32 len + utf8) | offset u32 | field u32`.
//! A pattern is `0x00 object_type bindings` or `0x01 kind u8 u32 children`.

use crate::descriptor::AccumulatorDescriptor;
use crate::function::Accumulator;
use crate::guard::GuardedAccumulator;
use crate::multi::{MultiAccumulate, Slot};
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use kestrel_core::{Binding, Error, GroupKind, Result, SourcePattern};
use tracing::debug;

/// Leading bytes of every persisted spec.
pub const MAGIC: [u8; 4] = *b"KACC";
/// Current format version.
pub const VERSION: u8 = 1;

const SLOT_ABSENT: u8 = 0;
const SLOT_DESCRIPTOR: u8 = 1;
const SLOT_GUARDED: u8 = 2;

const PATTERN_OBJECT: u8 = 0;
const PATTERN_GROUP: u8 = 1;

/// Deepest pattern nesting accepted on restore.
const MAX_PATTERN_DEPTH: usize = 64;

/// Serializes a spec. Compiled and unwired slots are written as absent.
///
/// Fails with `Error::Encode` when a count or string length does not fit
/// the u32 length prefix.
pub fn persist(spec: &MultiAccumulate) -> Result<Vec<u8>> {
    let mut enc = Encoder::default();
    enc.buffer.extend_from_slice(&MAGIC);
    enc.write_u8(VERSION);
    enc.write_bindings(spec.required_bindings())?;
    enc.write_pattern(spec.source())?;
    enc.write_len(spec.len())?;
    for slot in spec.slots() {
        match slot.function().and_then(|f| f.descriptor().map(|d| (f.is_guarded(), d))) {
            Some((guarded, descriptor)) => {
                enc.write_u8(if guarded { SLOT_GUARDED } else { SLOT_DESCRIPTOR });
                enc.write_descriptor(&descriptor)?;
            }
            None => enc.write_u8(SLOT_ABSENT),
        }
    }
    Ok(enc.buffer)
}

/// Rebuilds a spec. Absent slots come back unwired.
pub fn restore(bytes: &[u8]) -> Result<MultiAccumulate> {
    let mut dec = Decoder::new(bytes);
    if dec.take(MAGIC.len())? != MAGIC {
        return Err(Error::decode("bad magic"));
    }
    let version = dec.read_u8()?;
    if version != VERSION {
        return Err(Error::decode(format!("unsupported version {version}")));
    }
    let required = dec.read_bindings()?;
    let source = dec.read_pattern(0)?;

    let slot_count = dec.read_len()?;
    let mut slots = Vec::with_capacity(slot_count);
    for _ in 0..slot_count {
        let slot = match dec.read_u8()? {
            SLOT_ABSENT => Slot::Unwired,
            SLOT_DESCRIPTOR => Slot::Wired(dec.read_descriptor()?.instantiate()),
            SLOT_GUARDED => {
                Slot::Wired(GuardedAccumulator::wrap(dec.read_descriptor()?.instantiate()))
            }
            tag => return Err(Error::decode(format!("unknown slot tag {tag}"))),
        };
        slots.push(slot);
    }
    if !dec.is_at_end() {
        return Err(Error::decode("trailing bytes"));
    }

    let spec = MultiAccumulate::new(source, required, slots)
        .ok_or_else(|| Error::decode("spec without slots"))?;
    debug!(
        slots = spec.len(),
        unwired = spec.unwired_slots().count(),
        "restored accumulate spec"
    );
    Ok(spec)
}

#[derive(Default)]
struct Encoder {
    buffer: Vec<u8>,
}

impl Encoder {
    #[inline]
    fn write_u8(&mut self, v: u8) {
        self.buffer.push(v);
    }

    #[inline]
    fn write_u32(&mut self, v: u32) {
        self.buffer.extend_from_slice(&v.to_le_bytes());
    }

    fn write_len(&mut self, len: usize) -> Result<()> {
        let len = u32::try_from(len)
            .map_err(|_| Error::encode(format!("length {len} exceeds u32 prefix")))?;
        self.write_u32(len);
        Ok(())
    }

    fn write_str(&mut self, s: &str) -> Result<()> {
        self.write_len(s.len())?;
        self.buffer.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn write_binding(&mut self, b: &Binding) -> Result<()> {
        self.write_str(b.identifier())?;
        self.write_len(b.offset())?;
        self.write_len(b.field_index())
    }

    fn write_bindings(&mut self, bindings: &[Binding]) -> Result<()> {
        self.write_len(bindings.len())?;
        for b in bindings {
            self.write_binding(b)?;
        }
        Ok(())
    }

    fn write_pattern(&mut self, pattern: &SourcePattern) -> Result<()> {
        match pattern {
            SourcePattern::Pattern {
                object_type,
                declarations,
            } => {
                self.write_u8(PATTERN_OBJECT);
                self.write_str(object_type)?;
                self.write_bindings(declarations)
            }
            SourcePattern::Group { kind, children } => {
                self.write_u8(PATTERN_GROUP);
                self.write_u8(match kind {
                    GroupKind::And => 0,
                    GroupKind::Or => 1,
                    GroupKind::Not => 2,
                    GroupKind::Exists => 3,
                });
                self.write_len(children.len())?;
                for child in children {
                    self.write_pattern(child)?;
                }
                Ok(())
            }
        }
    }

    fn write_descriptor(&mut self, d: &AccumulatorDescriptor) -> Result<()> {
        let tag = match d {
            AccumulatorDescriptor::Count => 0,
            AccumulatorDescriptor::Sum(_) => 1,
            AccumulatorDescriptor::Average(_) => 2,
            AccumulatorDescriptor::Min(_) => 3,
            AccumulatorDescriptor::Max(_) => 4,
            AccumulatorDescriptor::CollectList(_) => 5,
        };
        self.write_u8(tag);
        match d.binding() {
            Some(b) => self.write_binding(b),
            None => Ok(()),
        }
    }
}

struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn is_at_end(&self) -> bool {
        self.pos == self.bytes.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::decode(format!(
                "truncated input: need {n} bytes at offset {}",
                self.pos
            )));
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    /// Reads an element count; every element takes at least one byte.
    fn read_len(&mut self) -> Result<usize> {
        let len = self.read_u32()? as usize;
        if len > self.remaining() {
            return Err(Error::decode(format!(
                "count {len} exceeds remaining {} bytes",
                self.remaining()
            )));
        }
        Ok(len)
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_len()?;
        let raw = self.take(len)?;
        core::str::from_utf8(raw)
            .map(String::from)
            .map_err(|_| Error::decode("invalid utf-8 in string"))
    }

    fn read_binding(&mut self) -> Result<Binding> {
        let identifier = self.read_string()?;
        let offset = self.read_u32()? as usize;
        let field = self.read_u32()? as usize;
        Ok(Binding::new(identifier, offset, field))
    }

    fn read_bindings(&mut self) -> Result<Vec<Binding>> {
        let count = self.read_len()?;
        (0..count).map(|_| self.read_binding()).collect()
    }

    fn read_pattern(&mut self, depth: usize) -> Result<SourcePattern> {
        if depth > MAX_PATTERN_DEPTH {
            return Err(Error::decode("pattern nesting too deep"));
        }
        match self.read_u8()? {
            PATTERN_OBJECT => {
                let object_type = self.read_string()?;
                let declarations = self.read_bindings()?;
                Ok(SourcePattern::pattern(object_type, declarations))
            }
            PATTERN_GROUP => {
                let kind = match self.read_u8()? {
                    0 => GroupKind::And,
                    1 => GroupKind::Or,
                    2 => GroupKind::Not,
                    3 => GroupKind::Exists,
                    other => return Err(Error::decode(format!("unknown group kind {other}"))),
                };
                let count = self.read_len()?;
                let children = (0..count)
                    .map(|_| self.read_pattern(depth + 1))
                    .collect::<Result<Vec<_>>>()?;
                Ok(SourcePattern::group(kind, children))
            }
            other => Err(Error::decode(format!("unknown pattern tag {other}"))),
        }
    }

    fn read_descriptor(&mut self) -> Result<AccumulatorDescriptor> {
        let tag = self.read_u8()?;
        if tag == 0 {
            return Ok(AccumulatorDescriptor::Count);
        }
        let binding = self.read_binding()?;
        Ok(match tag {
            1 => AccumulatorDescriptor::Sum(binding),
            2 => AccumulatorDescriptor::Average(binding),
            3 => AccumulatorDescriptor::Min(binding),
            4 => AccumulatorDescriptor::Max(binding),
            5 => AccumulatorDescriptor::CollectList(binding),
            other => return Err(Error::decode(format!("unknown function tag {other}"))),
        })
    }
}
