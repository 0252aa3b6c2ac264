//! Instruction-set capability queries
//!
//! The planner never inspects the host directly. It receives a [`CpuCapabilities`]
//! implementation, so plans can be produced (and tested) for any target:
//!
//! - [`HostCpu`]: runtime feature detection, cached after the first query
//! - [`SyntheticCpu`]: a fixed capability set
//!
//! | Extension       | Used for                                              |
//! |-----------------|-------------------------------------------------------|
//! | `Avx512Common`  | 32 × 512-bit registers, embedded broadcast, masks      |
//! | `Avx512Mic4Ops` | 4-way FMA (`v4fmaddps`) and 4-way s16 dot product      |

use std::fmt;
use std::sync::OnceLock;

/// Vector instruction-set extensions the generated code can rely on
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IsaExtension {
    /// AVX-512 foundation subset shared by all AVX-512 parts
    Avx512Common,
    /// 4-operand FMA and VNNI-style word dot products (Knights Mill class)
    Avx512Mic4Ops,
}

impl IsaExtension {
    /// Returns the name of this extension as a string
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Avx512Common => "AVX-512 (common)",
            Self::Avx512Mic4Ops => "AVX-512 4FMAPS/4VNNIW",
        }
    }
}

impl fmt::Display for IsaExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability collaborator injected into planning
pub trait CpuCapabilities {
    /// Returns true if code may use `ext`
    fn supports(&self, ext: IsaExtension) -> bool;

    /// Number of logical cores available to the caller's thread pool
    fn logical_cores(&self) -> usize;
}

impl<T: CpuCapabilities + ?Sized> CpuCapabilities for &T {
    fn supports(&self, ext: IsaExtension) -> bool {
        (**self).supports(ext)
    }

    fn logical_cores(&self) -> usize {
        (**self).logical_cores()
    }
}

/// Capabilities of the machine the process runs on
#[derive(Copy, Clone, Debug, Default)]
pub struct HostCpu;

#[derive(Copy, Clone, Debug)]
struct HostFeatures {
    avx512_common: bool,
    mic_4ops: bool,
    cores: usize,
}

/// Cached host detection
static HOST_FEATURES: OnceLock<HostFeatures> = OnceLock::new();

/// Perform actual CPU feature detection (called once)
#[cold]
fn detect_host_uncached() -> HostFeatures {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    #[cfg(target_arch = "x86_64")]
    let avx512_common = is_x86_feature_detected!("avx512f")
        && is_x86_feature_detected!("avx512cd")
        && is_x86_feature_detected!("fma");

    #[cfg(not(target_arch = "x86_64"))]
    let avx512_common = false;

    HostFeatures {
        avx512_common,
        mic_4ops: avx512_common && leaf7_edx().is_some_and(mic_4ops_from_edx),
        cores,
    }
}

/// CPUID leaf 7 sub-leaf 0 EDX, when the processor reports that leaf
#[cfg(target_arch = "x86_64")]
#[allow(unused_unsafe)]
fn leaf7_edx() -> Option<u32> {
    use std::arch::x86_64::{__cpuid_count, __get_cpuid_max};

    // SAFETY: cpuid is available on every x86-64 processor
    let (max_leaf, _) = unsafe { __get_cpuid_max(0) };
    if max_leaf < 7 {
        return None;
    }
    // SAFETY: leaf 7 is within the reported range
    Some(unsafe { __cpuid_count(7, 0) }.edx)
}

#[cfg(not(target_arch = "x86_64"))]
fn leaf7_edx() -> Option<u32> {
    None
}

/// AVX512_4VNNIW is EDX bit 2 and AVX512_4FMAPS bit 3; both are required
fn mic_4ops_from_edx(edx: u32) -> bool {
    const MIC_4OPS: u32 = (1 << 2) | (1 << 3);
    edx & MIC_4OPS == MIC_4OPS
}

impl CpuCapabilities for HostCpu {
    fn supports(&self, ext: IsaExtension) -> bool {
        let host = HOST_FEATURES.get_or_init(detect_host_uncached);
        match ext {
            IsaExtension::Avx512Common => host.avx512_common,
            IsaExtension::Avx512Mic4Ops => host.mic_4ops,
        }
    }

    fn logical_cores(&self) -> usize {
        HOST_FEATURES.get_or_init(detect_host_uncached).cores
    }
}

/// A fixed capability set
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntheticCpu {
    extensions: Vec<IsaExtension>,
    cores: usize,
}

impl SyntheticCpu {
    /// Create a capability set with the given extensions and core count
    pub fn new(extensions: &[IsaExtension], cores: usize) -> Self {
        Self {
            extensions: extensions.to_vec(),
            cores,
        }
    }

    /// AVX-512 server part without the 4-op extensions
    pub fn avx512(cores: usize) -> Self {
        Self::new(&[IsaExtension::Avx512Common], cores)
    }

    /// Knights Mill class part with the 4-op extensions
    pub fn avx512_mic(cores: usize) -> Self {
        Self::new(
            &[IsaExtension::Avx512Common, IsaExtension::Avx512Mic4Ops],
            cores,
        )
    }

    /// A part without AVX-512
    pub fn none(cores: usize) -> Self {
        Self::new(&[], cores)
    }
}

impl CpuCapabilities for SyntheticCpu {
    fn supports(&self, ext: IsaExtension) -> bool {
        self.extensions.contains(&ext)
    }

    fn logical_cores(&self) -> usize {
        self.cores
    }
}
