//! 资源数量与配额模型
//!
//! CPU以毫核(millicores)、内存以字节为单位保存；配置中使用Kubernetes写法，
//! 例如 `"500m"`、`"2"`、`"512Mi"`、`"1Gi"`。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::TaskplaneError;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawQuantity {
    Int(u64),
    Float(f64),
    Text(String),
}

/// CPU数量（毫核）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CpuQuantity(pub u64);

impl CpuQuantity {
    pub fn millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn cores(cores: u64) -> Self {
        Self(cores.saturating_mul(1000))
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }
}

impl FromStr for CpuQuantity {
    type Err = TaskplaneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || TaskplaneError::Configuration(format!("无效的CPU数量: {s:?}"));
        if let Some(millis) = s.strip_suffix('m') {
            return millis.parse::<u64>().map(CpuQuantity).map_err(|_| invalid());
        }
        let cores: f64 = s.parse().map_err(|_| invalid())?;
        if !cores.is_finite() || cores < 0.0 {
            return Err(invalid());
        }
        Ok(CpuQuantity((cores * 1000.0).round() as u64))
    }
}

impl fmt::Display for CpuQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 1000 == 0 {
            write!(f, "{}", self.0 / 1000)
        } else {
            write!(f, "{}m", self.0)
        }
    }
}

impl Serialize for CpuQuantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CpuQuantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawQuantity::deserialize(deserializer)? {
            RawQuantity::Int(cores) => Ok(CpuQuantity::cores(cores)),
            RawQuantity::Float(cores) if cores.is_finite() && cores >= 0.0 => {
                Ok(CpuQuantity((cores * 1000.0).round() as u64))
            }
            RawQuantity::Float(cores) => Err(serde::de::Error::custom(format!(
                "无效的CPU数量: {cores}"
            ))),
            RawQuantity::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// 内存数量（字节）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemoryQuantity(pub u64);

const MEMORY_SUFFIXES: &[(&str, u64)] = &[
    ("Ki", 1 << 10),
    ("Mi", 1 << 20),
    ("Gi", 1 << 30),
    ("Ti", 1 << 40),
    ("k", 1_000),
    ("K", 1_000),
    ("M", 1_000_000),
    ("G", 1_000_000_000),
    ("T", 1_000_000_000_000),
];

impl MemoryQuantity {
    pub fn bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub fn mebibytes(mib: u64) -> Self {
        Self(mib.saturating_mul(1 << 20))
    }

    pub fn as_bytes(self) -> u64 {
        self.0
    }
}

impl FromStr for MemoryQuantity {
    type Err = TaskplaneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || TaskplaneError::Configuration(format!("无效的内存数量: {s:?}"));
        let (number, multiplier) = MEMORY_SUFFIXES
            .iter()
            .find_map(|(suffix, mult)| s.strip_suffix(suffix).map(|n| (n, *mult)))
            .unwrap_or((s, 1));

        if let Ok(whole) = number.parse::<u64>() {
            return whole
                .checked_mul(multiplier)
                .map(MemoryQuantity)
                .ok_or_else(invalid);
        }
        let value: f64 = number.parse().map_err(|_| invalid())?;
        if !value.is_finite() || value < 0.0 {
            return Err(invalid());
        }
        Ok(MemoryQuantity((value * multiplier as f64).round() as u64))
    }
}

impl fmt::Display for MemoryQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (suffix, mult) in [("Gi", 1u64 << 30), ("Mi", 1 << 20), ("Ki", 1 << 10)] {
            if self.0 >= mult && self.0 % mult == 0 {
                return write!(f, "{}{}", self.0 / mult, suffix);
            }
        }
        write!(f, "{}", self.0)
    }
}

impl Serialize for MemoryQuantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MemoryQuantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawQuantity::deserialize(deserializer)? {
            RawQuantity::Int(bytes) => Ok(MemoryQuantity(bytes)),
            RawQuantity::Float(bytes) if bytes.is_finite() && bytes >= 0.0 => {
                Ok(MemoryQuantity(bytes.round() as u64))
            }
            RawQuantity::Float(bytes) => Err(serde::de::Error::custom(format!(
                "无效的内存数量: {bytes}"
            ))),
            RawQuantity::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// 一组可选的资源值，缺省的字段由LimitRange补齐
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Resources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuQuantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryQuantity>,
}

impl Resources {
    pub fn new(cpu: CpuQuantity, memory: MemoryQuantity) -> Self {
        Self {
            cpu: Some(cpu),
            memory: Some(memory),
        }
    }
}

/// 即将创建的Worker/Scheduler实例声明的资源形状
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceSpec {
    #[serde(default)]
    pub requests: Resources,
    #[serde(default)]
    pub limits: Resources,
}

/// 命名空间级别的聚合上限，`None` 表示不限制
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceQuota {
    #[serde(default)]
    pub cpu: Option<CpuQuantity>,
    #[serde(default)]
    pub memory: Option<MemoryQuantity>,
    #[serde(default)]
    pub workers: Option<u32>,
    #[serde(default)]
    pub schedulers: Option<u32>,
}

/// 单个实例的默认值与取值范围
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitRange {
    /// 缺省的limits
    #[serde(default)]
    pub default: Resources,
    /// 缺省的requests，未配置时回退到limits
    #[serde(default)]
    pub default_request: Resources,
    #[serde(default)]
    pub min: Resources,
    #[serde(default)]
    pub max: Resources,
}

/// 需要准入的实例类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceKind {
    Worker,
    Scheduler,
}

impl InstanceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InstanceKind::Worker => "worker",
            InstanceKind::Scheduler => "scheduler",
        }
    }
}

/// 命名空间当前已预留的资源
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceUsage {
    pub namespace: String,
    pub cpu_millis: u64,
    pub memory_bytes: u64,
    pub workers: u32,
    pub schedulers: u32,
}
