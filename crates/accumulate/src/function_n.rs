//! Variable-arity functions used by generated aggregate implementations.
//!
//! A `FunctionN` is either a bare closure, equal only to itself, or a closure
//! tagged with the fingerprint of the source expression it was generated from.
//! Fingerprinted functions compare by fingerprint, so two independently loaded
//! builds of the same expression are interchangeable without ever looking at
//! the closures.

use alloc::sync::Arc;
use core::fmt;
use core::hash::{Hash, Hasher};
use kestrel_core::{Error, Result, Value};
use sha2::{Digest, Sha256};

/// Closure signature shared by every `FunctionN`.
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

const FINGERPRINT_DOMAIN_TAG: &[u8] = b"kestrel.function-n.v1";

/// Stable identity of a generated function.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Fingerprint of a single source expression.
    pub fn of_source(source: &str) -> Self {
        Self::of_parts("expr", &[source.as_bytes()])
    }

    /// Fingerprint over labelled, length-framed parts.
    pub fn of_parts(label: &str, parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_DOMAIN_TAG);
        write_framed(&mut hasher, label.as_bytes());
        for part in parts {
            write_framed(&mut hasher, part);
        }
        Self(hasher.finalize().into())
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

fn write_framed(hasher: &mut Sha256, bytes: &[u8]) {
    let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
    hasher.update(len.to_be_bytes());
    hasher.update(bytes);
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A variable-arity function over positional values.
#[derive(Clone)]
pub enum FunctionN {
    /// Generated from a source expression; identity is the fingerprint.
    Fingerprinted {
        fingerprint: Fingerprint,
        function: NativeFn,
    },
    /// A plain closure; identity is the closure instance.
    Direct(NativeFn),
}

impl FunctionN {
    /// Wraps a closure generated from `source`.
    pub fn fingerprinted<F>(source: &str, function: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        FunctionN::Fingerprinted {
            fingerprint: Fingerprint::of_source(source),
            function: Arc::new(function),
        }
    }

    pub fn direct<F>(function: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        FunctionN::Direct(Arc::new(function))
    }

    pub fn apply(&self, args: &[Value]) -> Result<Value> {
        match self {
            FunctionN::Fingerprinted { function, .. } | FunctionN::Direct(function) => {
                function(args)
            }
        }
    }

    pub fn fingerprint(&self) -> Option<Fingerprint> {
        match self {
            FunctionN::Fingerprinted { fingerprint, .. } => Some(*fingerprint),
            FunctionN::Direct(_) => None,
        }
    }

    /// Returns the underlying closure of a direct function.
    ///
    /// A fingerprinted function never exposes its closure; asking for it is a
    /// programming error.
    pub fn lambda(&self) -> Result<&NativeFn> {
        match self {
            FunctionN::Fingerprinted { .. } => Err(Error::unsupported("FunctionN::lambda")),
            FunctionN::Direct(function) => Ok(function),
        }
    }

    fn instance_addr(function: &NativeFn) -> usize {
        Arc::as_ptr(function) as *const () as usize
    }
}

impl PartialEq for FunctionN {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                FunctionN::Fingerprinted { fingerprint: a, .. },
                FunctionN::Fingerprinted { fingerprint: b, .. },
            ) => a == b,
            (FunctionN::Direct(a), FunctionN::Direct(b)) => {
                Self::instance_addr(a) == Self::instance_addr(b)
            }
            _ => false,
        }
    }
}

impl Eq for FunctionN {}

impl Hash for FunctionN {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            FunctionN::Fingerprinted { fingerprint, .. } => fingerprint.hash(state),
            FunctionN::Direct(function) => Self::instance_addr(function).hash(state),
        }
    }
}

impl fmt::Debug for FunctionN {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionN::Fingerprinted { fingerprint, .. } => {
                f.debug_tuple("Fingerprinted").field(fingerprint).finish()
            }
            FunctionN::Direct(function) => {
                write!(f, "Direct({:#x})", Self::instance_addr(function))
            }
        }
    }
}
