use std::time::Duration;

/// ARP cache aging and resolution retry timings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpTimers {
    /// REACHABLE for this long without refresh becomes STALE.
    pub reachable: Duration,
    /// STALE for this long without refresh is evicted.
    pub stale: Duration,
    pub sweep_interval: Duration,
    /// Delay before each resend. A job fails once these are used up.
    pub retry_delays: Vec<Duration>,
}

impl Default for ArpTimers {
    fn default() -> Self {
        Self {
            reachable: Duration::from_secs(60),
            stale: Duration::from_secs(120),
            sweep_interval: Duration::from_secs(1),
            retry_delays: vec![
                Duration::from_millis(1000),
                Duration::from_millis(1000),
                Duration::from_millis(2000),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RipTimers {
    pub update: Duration,
    /// Unrefreshed routes are poisoned after this.
    pub timeout: Duration,
    /// Poisoned routes are removed this long after the timeout.
    pub garbage_collection: Duration,
    pub aging_interval: Duration,
    /// Minimum spacing of triggered updates on one interface.
    pub trigger_holddown: Duration,
}

impl Default for RipTimers {
    fn default() -> Self {
        Self {
            update: Duration::from_secs(30),
            timeout: Duration::from_secs(180),
            garbage_collection: Duration::from_secs(240),
            aging_interval: Duration::from_secs(5),
            trigger_holddown: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    pub arp: ArpTimers,
    pub rip: RipTimers,
    /// Proxy-ARP state at startup.
    pub proxy_arp: bool,
    /// How long an unbind waits for the receive loop before aborting it.
    pub unbind_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            arp: Default::default(),
            rip: Default::default(),
            proxy_arp: true,
            unbind_timeout: Duration::from_secs(2),
        }
    }
}
