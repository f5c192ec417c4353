use std::fmt;
use std::time::Duration;

#[cfg(feature = "cli")]
use std::sync::Mutex;
#[cfg(feature = "cli")]
use std::time::Instant;
#[cfg(feature = "cli")]
use sysinfo::{Pid, ProcessesToUpdate, System};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Extract,
    Transform,
    Load,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Extract => "extract",
            Phase::Transform => "transform",
            Phase::Load => "load",
        };
        f.write_str(name)
    }
}

/// Process sample taken at the end of one acquisition phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseUsage {
    pub phase: Phase,
    pub memory_mb: u64,
    pub cpu_usage: f32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceUsage {
    pub phases: Vec<PhaseUsage>,
}

impl ResourceUsage {
    pub fn record(&mut self, usage: PhaseUsage) {
        self.phases.push(usage);
    }

    pub fn peak_memory_mb(&self) -> Option<u64> {
        self.phases.iter().map(|p| p.memory_mb).max()
    }

    /// Phase with the highest resident memory; the first one wins ties.
    pub fn heaviest_phase(&self) -> Option<Phase> {
        self.phases
            .iter()
            .fold(None::<&PhaseUsage>, |best, p| match best {
                Some(b) if b.memory_mb >= p.memory_mb => Some(b),
                _ => Some(p),
            })
            .map(|p| p.phase)
    }
}

/// Samples this process after each phase of an acquisition job. Stitching
/// whole scenes is where memory climbs, so the job report carries the peak.
#[cfg(feature = "cli")]
pub struct SystemMonitor {
    system: Mutex<System>,
    pid: Option<Pid>,
    start_time: Instant,
    usage: Mutex<ResourceUsage>,
    enabled: bool,
}

#[cfg(feature = "cli")]
impl SystemMonitor {
    pub fn new(enabled: bool) -> Self {
        let pid = sysinfo::get_current_pid().ok();
        if enabled && pid.is_none() {
            tracing::warn!("⚠️ Could not resolve current PID, resource monitoring disabled");
        }

        Self {
            system: Mutex::new(System::new()),
            pid,
            start_time: Instant::now(),
            usage: Mutex::new(ResourceUsage::default()),
            enabled: enabled && pid.is_some(),
        }
    }

    fn read_process(&self) -> Option<(u64, f32)> {
        let pid = self.pid?;
        let mut system = self.system.lock().ok()?;
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let process = system.process(pid)?;
        Some((process.memory() / 1024 / 1024, process.cpu_usage()))
    }

    pub fn sample(&self, phase: Phase) {
        if !self.enabled {
            return;
        }
        let Some((memory_mb, cpu_usage)) = self.read_process() else {
            return;
        };
        let usage = PhaseUsage {
            phase,
            memory_mb,
            cpu_usage,
            elapsed: self.start_time.elapsed(),
        };
        tracing::info!(
            "📊 {} - CPU: {:.1}%, Memory: {}MB, Time: {:?}",
            phase,
            usage.cpu_usage,
            usage.memory_mb,
            usage.elapsed
        );
        if let Ok(mut recorded) = self.usage.lock() {
            recorded.record(usage);
        }
    }

    /// Everything sampled so far, or `None` when monitoring is off.
    pub fn finish(&self) -> Option<ResourceUsage> {
        if !self.enabled {
            return None;
        }
        let usage = self.usage.lock().ok()?.clone();
        if let (Some(peak), Some(phase)) = (usage.peak_memory_mb(), usage.heaviest_phase()) {
            tracing::info!(
                "📊 Job took {:?}, peak memory {}MB during {}",
                self.start_time.elapsed(),
                peak,
                phase
            );
        }
        Some(usage)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(not(feature = "cli"))]
#[derive(Default)]
pub struct SystemMonitor;

#[cfg(not(feature = "cli"))]
impl SystemMonitor {
    pub fn new(_enabled: bool) -> Self {
        Self
    }

    pub fn sample(&self, _phase: Phase) {}

    pub fn finish(&self) -> Option<ResourceUsage> {
        None
    }

    pub fn is_enabled(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(phase: Phase, memory_mb: u64) -> PhaseUsage {
        PhaseUsage {
            phase,
            memory_mb,
            cpu_usage: 0.0,
            elapsed: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_peak_is_the_heaviest_phase() {
        let mut recorded = ResourceUsage::default();
        recorded.record(usage(Phase::Extract, 120));
        recorded.record(usage(Phase::Transform, 480));
        recorded.record(usage(Phase::Load, 480));

        assert_eq!(recorded.peak_memory_mb(), Some(480));
        assert_eq!(recorded.heaviest_phase(), Some(Phase::Transform));
    }

    #[test]
    fn test_empty_usage_has_no_peak() {
        let recorded = ResourceUsage::default();
        assert_eq!(recorded.peak_memory_mb(), None);
        assert_eq!(recorded.heaviest_phase(), None);
    }

    #[test]
    fn test_disabled_monitor_reports_nothing() {
        let monitor = SystemMonitor::new(false);
        monitor.sample(Phase::Extract);
        assert!(!monitor.is_enabled());
        assert!(monitor.finish().is_none());
    }

    #[cfg(feature = "cli")]
    #[test]
    fn test_enabled_monitor_records_each_phase() {
        let monitor = SystemMonitor::new(true);
        for phase in [Phase::Extract, Phase::Transform, Phase::Load] {
            monitor.sample(phase);
        }
        let recorded = monitor.finish().unwrap();
        let phases: Vec<Phase> = recorded.phases.iter().map(|p| p.phase).collect();
        assert_eq!(phases, vec![Phase::Extract, Phase::Transform, Phase::Load]);
        assert!(recorded.peak_memory_mb().is_some());
    }
}
