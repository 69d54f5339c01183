//! Architecture identifiers used to pick slices.

use goblin::mach::cputype::{
    get_arch_from_flag, get_arch_name_from_types, CPU_TYPE_ARM, CPU_TYPE_ARM64, CPU_TYPE_I386,
    CPU_TYPE_POWERPC, CPU_TYPE_POWERPC64, CPU_TYPE_X86_64,
};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::header::SliceDescriptor;

/// Capability bits in the high byte of a cpusubtype (e.g. the arm64e ABI flag).
pub const CPU_SUBTYPE_MASK: u32 = 0xff00_0000;

/// Identifies the slices a request applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchitectureId {
    /// A single `(cputype, cpusubtype)` pair. The subtype is stored without
    /// capability bits.
    Exact { cputype: u32, cpusubtype: u32 },
    /// Every slice of one cputype, whatever its subtype.
    Family(u32),
}

impl ArchitectureId {
    pub fn exact(cputype: u32, cpusubtype: u32) -> Self {
        ArchitectureId::Exact {
            cputype,
            cpusubtype: cpusubtype & !CPU_SUBTYPE_MASK,
        }
    }

    pub fn cputype(&self) -> u32 {
        match *self {
            ArchitectureId::Exact { cputype, .. } | ArchitectureId::Family(cputype) => cputype,
        }
    }

    pub fn matches(&self, descriptor: &SliceDescriptor) -> bool {
        match *self {
            ArchitectureId::Exact { cputype, cpusubtype } => {
                descriptor.cputype == cputype
                    && descriptor.cpusubtype & !CPU_SUBTYPE_MASK == cpusubtype
            }
            ArchitectureId::Family(cputype) => descriptor.cputype == cputype,
        }
    }

    /// Whether the id belongs to the arm64 family (arm64, arm64e, ...).
    pub fn is_arm64(&self) -> bool {
        self.cputype() == CPU_TYPE_ARM64
    }

    /// Conventional name such as `x86_64` or `arm64e`, if one is known.
    pub fn name(&self) -> Option<&'static str> {
        match *self {
            ArchitectureId::Exact { cputype, cpusubtype } => get_arch_name_from_types(cputype, cpusubtype),
            ArchitectureId::Family(cputype) => family_name(cputype),
        }
    }
}

fn family_name(cputype: u32) -> Option<&'static str> {
    Some(match cputype {
        CPU_TYPE_X86_64 => "x86_64",
        CPU_TYPE_I386 => "i386",
        CPU_TYPE_ARM64 => "arm64",
        CPU_TYPE_ARM => "arm",
        CPU_TYPE_POWERPC => "ppc",
        CPU_TYPE_POWERPC64 => "ppc64",
        _ => return None,
    })
}

impl fmt::Display for ArchitectureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (*self, self.name()) {
            (ArchitectureId::Exact { .. }, Some(name)) => f.write_str(name),
            (ArchitectureId::Exact { cputype, cpusubtype }, None) => {
                write!(f, "{cputype:#x}:{cpusubtype}")
            }
            (ArchitectureId::Family(_), Some(name)) => write!(f, "{name}:*"),
            (ArchitectureId::Family(cputype), None) => write!(f, "{cputype:#x}:*"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown architecture '{0}' (expected a name like x86_64, NAME:*, or CPUTYPE:SUBTYPE)")]
pub struct ParseArchError(String);

/// Accepts:
/// - a name known to `lipo`, e.g. `x86_64`, `arm64e`, `i386`
/// - `NAME:*` for every subtype of that name's cputype
/// - numeric `CPUTYPE:SUBTYPE` or `CPUTYPE:*`, decimal or `0x` hex
impl FromStr for ArchitectureId {
    type Err = ParseArchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseArchError(s.to_string());
        let s = s.trim();

        if let Some((ty, sub)) = s.split_once(':') {
            let cputype = match parse_number(ty) {
                Some(n) => n,
                None => get_arch_from_flag(ty).ok_or_else(err)?.0,
            };
            return if sub == "*" {
                Ok(ArchitectureId::Family(cputype))
            } else {
                let cpusubtype = parse_number(sub).ok_or_else(err)?;
                Ok(ArchitectureId::exact(cputype, cpusubtype))
            };
        }

        let (cputype, cpusubtype) = get_arch_from_flag(s).ok_or_else(err)?;
        Ok(ArchitectureId::exact(cputype, cpusubtype))
    }
}

fn parse_number(s: &str) -> Option<u32> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use goblin::mach::cputype::{CPU_SUBTYPE_ARM64_ALL, CPU_SUBTYPE_X86_64_ALL};

    fn descriptor(cputype: u32, cpusubtype: u32) -> SliceDescriptor {
        SliceDescriptor {
            cputype,
            cpusubtype,
            offset: 0x4000,
            size: 16,
            align: 14,
            reserved: 0,
        }
    }

    #[test]
    fn test_parse_names() {
        let id: ArchitectureId = "x86_64".parse().unwrap();
        assert_eq!(id, ArchitectureId::exact(CPU_TYPE_X86_64, CPU_SUBTYPE_X86_64_ALL));
        assert_eq!(id.to_string(), "x86_64");

        let id: ArchitectureId = "arm64".parse().unwrap();
        assert!(id.is_arm64());
        assert_eq!(id.to_string(), "arm64");
    }

    #[test]
    fn test_parse_family_and_numeric() {
        assert_eq!(
            "arm64:*".parse::<ArchitectureId>().unwrap(),
            ArchitectureId::Family(CPU_TYPE_ARM64)
        );
        assert_eq!(
            "0x1000007:3".parse::<ArchitectureId>().unwrap(),
            ArchitectureId::exact(CPU_TYPE_X86_64, 3)
        );
        assert_eq!(
            "16777223:*".parse::<ArchitectureId>().unwrap(),
            ArchitectureId::Family(CPU_TYPE_X86_64)
        );
        assert_eq!(ArchitectureId::Family(CPU_TYPE_ARM64).to_string(), "arm64:*");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("sparc9000".parse::<ArchitectureId>().is_err());
        assert!("x86_64:abc".parse::<ArchitectureId>().is_err());
    }

    #[test]
    fn test_matching_ignores_capability_bits() {
        let arm64 = ArchitectureId::exact(CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64_ALL);
        assert!(arm64.matches(&descriptor(CPU_TYPE_ARM64, 0x8000_0000)));
        assert!(!arm64.matches(&descriptor(CPU_TYPE_ARM64, 2)));
        assert!(!arm64.matches(&descriptor(CPU_TYPE_X86_64, 0)));
    }

    #[test]
    fn test_family_matches_every_subtype() {
        let family = ArchitectureId::Family(CPU_TYPE_X86_64);
        assert!(family.matches(&descriptor(CPU_TYPE_X86_64, 3)));
        assert!(family.matches(&descriptor(CPU_TYPE_X86_64, 8)));
        assert!(!family.matches(&descriptor(CPU_TYPE_I386, 3)));
    }

    #[test]
    fn test_unknown_types_display_numerically() {
        let id = ArchitectureId::exact(0x99, 1);
        assert_eq!(id.to_string(), "0x99:1");
    }
}
