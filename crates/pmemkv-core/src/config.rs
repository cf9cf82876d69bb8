//! Configuration bag consumed by engine constructors
//!
//! A `Config` maps option names to typed values. Engines read it exactly once
//! while opening; `PoolOptions::from_config` parses and validates every pool
//! option before anything on disk is touched.

use std::fmt;
use std::path::PathBuf;

use hashbrown::HashMap;

use crate::comparator::SharedComparator;
use crate::error::{KvError, KvResult};

/// Pool location (string)
pub const OPT_PATH: &str = "path";
/// Pool capacity in bytes on creation (uint64)
pub const OPT_SIZE: &str = "size";
/// Legacy alias of `create_or_error_if_exists` (bool)
pub const OPT_FORCE_CREATE: &str = "force_create";
/// Create the pool when it does not exist (bool)
pub const OPT_CREATE_IF_MISSING: &str = "create_if_missing";
/// Create the pool, failing if it already exists (bool)
pub const OPT_CREATE_OR_ERROR_IF_EXISTS: &str = "create_or_error_if_exists";
/// Key ordering for ordered engines (comparator)
pub const OPT_COMPARATOR: &str = "comparator";
/// Object id selecting an engine root inside a shared pool (object)
pub const OPT_OID: &str = "oid";

/// Smallest pool capacity accepted on creation.
pub const MIN_POOL_SIZE: u64 = 4096;

/// Reference to an engine root object inside a larger pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolObjectId(pub u64);

/// A typed option value.
#[derive(Clone)]
pub enum ConfigValue {
    String(String),
    UInt64(u64),
    Int64(i64),
    Bool(bool),
    Data(Vec<u8>),
    Comparator(SharedComparator),
    Object(PoolObjectId),
}

impl ConfigValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::String(_) => "string",
            ConfigValue::UInt64(_) => "uint64",
            ConfigValue::Int64(_) => "int64",
            ConfigValue::Bool(_) => "bool",
            ConfigValue::Data(_) => "data",
            ConfigValue::Comparator(_) => "comparator",
            ConfigValue::Object(_) => "object",
        }
    }
}

impl fmt::Debug for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::String(s) => write!(f, "String({:?})", s),
            ConfigValue::UInt64(v) => write!(f, "UInt64({})", v),
            ConfigValue::Int64(v) => write!(f, "Int64({})", v),
            ConfigValue::Bool(v) => write!(f, "Bool({})", v),
            ConfigValue::Data(d) => write!(f, "Data({} bytes)", d.len()),
            ConfigValue::Comparator(c) => write!(f, "Comparator({:?})", c.name()),
            ConfigValue::Object(oid) => write!(f, "Object({})", oid.0),
        }
    }
}

/// Option name to typed value mapping.
#[derive(Debug, Clone, Default)]
pub struct Config {
    entries: HashMap<String, ConfigValue>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: ConfigValue) -> &mut Self {
        self.entries.insert(key.into(), value);
        self
    }

    pub fn put_string(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.put(key, ConfigValue::String(value.into()))
    }

    pub fn put_uint64(&mut self, key: impl Into<String>, value: u64) -> &mut Self {
        self.put(key, ConfigValue::UInt64(value))
    }

    pub fn put_int64(&mut self, key: impl Into<String>, value: i64) -> &mut Self {
        self.put(key, ConfigValue::Int64(value))
    }

    pub fn put_bool(&mut self, key: impl Into<String>, value: bool) -> &mut Self {
        self.put(key, ConfigValue::Bool(value))
    }

    pub fn put_data(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.put(key, ConfigValue::Data(value.into()))
    }

    pub fn put_comparator(&mut self, comparator: SharedComparator) -> &mut Self {
        self.put(OPT_COMPARATOR, ConfigValue::Comparator(comparator))
    }

    pub fn put_oid(&mut self, oid: PoolObjectId) -> &mut Self {
        self.put(OPT_OID, ConfigValue::Object(oid))
    }

    pub fn put_path(&mut self, path: impl Into<String>) -> &mut Self {
        self.put_string(OPT_PATH, path)
    }

    pub fn put_size(&mut self, size: u64) -> &mut Self {
        self.put_uint64(OPT_SIZE, size)
    }

    pub fn put_create_if_missing(&mut self, value: bool) -> &mut Self {
        self.put_bool(OPT_CREATE_IF_MISSING, value)
    }

    pub fn put_create_or_error_if_exists(&mut self, value: bool) -> &mut Self {
        self.put_bool(OPT_CREATE_OR_ERROR_IF_EXISTS, value)
    }

    pub fn put_force_create(&mut self, value: bool) -> &mut Self {
        self.put_bool(OPT_FORCE_CREATE, value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn type_error(key: &str, expected: &'static str, found: &ConfigValue) -> KvError {
        KvError::ConfigType {
            option: key.to_string(),
            expected,
            found: found.type_name(),
        }
    }

    pub fn get_string(&self, key: &str) -> KvResult<Option<&str>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(ConfigValue::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(Self::type_error(key, "string", other)),
        }
    }

    /// Reads a uint64; a non-negative int64 is accepted as well.
    pub fn get_uint64(&self, key: &str) -> KvResult<Option<u64>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(ConfigValue::UInt64(v)) => Ok(Some(*v)),
            Some(ConfigValue::Int64(v)) if *v >= 0 => Ok(Some(*v as u64)),
            Some(other) => Err(Self::type_error(key, "uint64", other)),
        }
    }

    pub fn get_int64(&self, key: &str) -> KvResult<Option<i64>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(ConfigValue::Int64(v)) => Ok(Some(*v)),
            Some(ConfigValue::UInt64(v)) if *v <= i64::MAX as u64 => Ok(Some(*v as i64)),
            Some(other) => Err(Self::type_error(key, "int64", other)),
        }
    }

    /// Reads a bool; a uint64 of 0 or 1 is accepted for compatibility.
    pub fn get_bool(&self, key: &str) -> KvResult<Option<bool>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(ConfigValue::Bool(v)) => Ok(Some(*v)),
            Some(ConfigValue::UInt64(0)) => Ok(Some(false)),
            Some(ConfigValue::UInt64(1)) => Ok(Some(true)),
            Some(other) => Err(Self::type_error(key, "bool", other)),
        }
    }

    pub fn get_data(&self, key: &str) -> KvResult<Option<&[u8]>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(ConfigValue::Data(d)) => Ok(Some(d.as_slice())),
            Some(other) => Err(Self::type_error(key, "data", other)),
        }
    }

    pub fn get_comparator(&self, key: &str) -> KvResult<Option<SharedComparator>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(ConfigValue::Comparator(c)) => Ok(Some(c.clone())),
            Some(other) => Err(Self::type_error(key, "comparator", other)),
        }
    }

    pub fn get_object(&self, key: &str) -> KvResult<Option<PoolObjectId>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(ConfigValue::Object(oid)) => Ok(Some(*oid)),
            Some(other) => Err(Self::type_error(key, "object", other)),
        }
    }
}

/// How a pool location is treated on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Pool must already exist
    OpenExisting,
    /// Open if present, create otherwise
    CreateIfMissing,
    /// Pool must not exist yet
    CreateOrErrorIfExists,
}

/// Validated pool options extracted from a `Config`.
#[derive(Clone)]
pub struct PoolOptions {
    pub path: PathBuf,
    pub size: Option<u64>,
    pub mode: OpenMode,
    pub comparator: Option<SharedComparator>,
    pub oid: Option<PoolObjectId>,
}

impl PoolOptions {
    /// Parse and validate pool options. Performs no I/O.
    pub fn from_config(config: &Config) -> KvResult<Self> {
        let path = match config.get_string(OPT_PATH)? {
            Some(p) if !p.is_empty() => PathBuf::from(p),
            Some(_) => {
                return Err(KvError::ConfigParsing {
                    option: OPT_PATH.into(),
                    reason: "must not be empty".into(),
                })
            }
            None => {
                return Err(KvError::ConfigParsing {
                    option: OPT_PATH.into(),
                    reason: "required option is missing".into(),
                })
            }
        };

        let size = config.get_uint64(OPT_SIZE)?;
        let create_if_missing = config.get_bool(OPT_CREATE_IF_MISSING)?.unwrap_or(false);
        let create_or_error = config.get_bool(OPT_CREATE_OR_ERROR_IF_EXISTS)?.unwrap_or(false)
            || config.get_bool(OPT_FORCE_CREATE)?.unwrap_or(false);
        let comparator = config.get_comparator(OPT_COMPARATOR)?;
        let oid = config.get_object(OPT_OID)?;

        if create_if_missing && create_or_error {
            return Err(KvError::ConfigParsing {
                option: OPT_CREATE_IF_MISSING.into(),
                reason: "mutually exclusive with create_or_error_if_exists".into(),
            });
        }

        let mode = if create_or_error {
            OpenMode::CreateOrErrorIfExists
        } else if create_if_missing {
            OpenMode::CreateIfMissing
        } else {
            OpenMode::OpenExisting
        };

        let options = Self { path, size, mode, comparator, oid };
        options.validate()?;
        Ok(options)
    }

    /// Validate cross-option constraints.
    pub fn validate(&self) -> KvResult<()> {
        if let Some(size) = self.size {
            if size < MIN_POOL_SIZE {
                return Err(KvError::invalid(format!(
                    "size must be >= {} bytes, got {}",
                    MIN_POOL_SIZE, size
                )));
            }
            if size > u32::MAX as u64 * 16 {
                return Err(KvError::invalid(format!("size {} exceeds the arena limit", size)));
            }
        }
        if self.mode == OpenMode::CreateOrErrorIfExists && self.size.is_none() {
            return Err(KvError::ConfigParsing {
                option: OPT_SIZE.into(),
                reason: "required when creating a pool".into(),
            });
        }
        Ok(())
    }

    /// Directory holding this engine's files.
    pub fn root(&self) -> PathBuf {
        match self.oid {
            Some(PoolObjectId(id)) => self.path.join(format!("oid-{:016x}", id)),
            None => self.path.clone(),
        }
    }
}

impl fmt::Debug for PoolOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolOptions")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("mode", &self.mode)
            .field("comparator", &self.comparator.as_ref().map(|c| c.name().to_string()))
            .field("oid", &self.oid)
            .finish()
    }
}
