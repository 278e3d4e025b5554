//! Region-based transmission delay model

use std::{collections::HashMap, fmt::Display};

use thiserror::Error;

/// Geographic regions a node can be placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Region {
    US,
    CH,
    RU,
    KZ,
    ML,
    CN,
    GE,
    NR,
    VN,
}

impl Region {
    pub const ALL: [Region; 9] = [
        Region::US,
        Region::CH,
        Region::RU,
        Region::KZ,
        Region::ML,
        Region::CN,
        Region::GE,
        Region::NR,
        Region::VN,
    ];
}

impl Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Upload and download capacity of a region, in bytes per second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkSpeed {
    pub up: f64,
    pub down: f64,
}

impl LinkSpeed {
    /// Creates a [`LinkSpeed`] from values given in megabits per second.
    pub fn from_mbps(up: f64, down: f64) -> Self {
        const BYTES_PER_MEGABIT: f64 = 1e6 / 8.0;
        LinkSpeed { up: up * BYTES_PER_MEGABIT, down: down * BYTES_PER_MEGABIT }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NetworkConfigError {
    #[error("no latency entry for region pair ({0}, {1})")]
    MissingLatency(Region, Region),
    #[error("no link speed entry for region {0}")]
    MissingSpeed(Region),
    #[error("latency {latency} between {a} and {b} is negative or not a number")]
    BadLatency { a: Region, b: Region, latency: f64 },
    #[error("bandwidth from {from} to {to} is {bandwidth}, must be positive")]
    BadBandwidth { from: Region, to: Region, bandwidth: f64 },
}

/// How the throughput of a link is derived from the speeds of its ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BandwidthRule {
    /// The smaller of the two directional caps, `min(up(a), down(b))` and
    /// `min(up(b), down(a))`. Delays are the same in both directions.
    #[default]
    Symmetric,
    /// `min(up(from), down(to))` only.
    Directional,
}

/// Computes the time taken by a payload to cross the link between two
/// regions: `latency(a, b) + size / bandwidth(a, b)`.
///
/// Latency entries are symmetric; a pair may be stored in either orientation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DelayModel {
    /// Latency in seconds.
    latency: HashMap<(Region, Region), f64>,
    speed: HashMap<Region, LinkSpeed>,
    rule: BandwidthRule,
}

impl DelayModel {
    /// Creates a model with no entries. Every lookup fails until entries are
    /// added with [`with_latency`](Self::with_latency) and
    /// [`with_speed`](Self::with_speed).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Sets the one-way latency between `a` and `b`, in milliseconds.
    pub fn with_latency(mut self, a: Region, b: Region, millis: f64) -> Self {
        self.latency.remove(&(b, a));
        self.latency.insert((a, b), millis * 0.001);

        self
    }

    pub fn with_speed(mut self, region: Region, speed: LinkSpeed) -> Self {
        self.speed.insert(region, speed);

        self
    }

    pub fn with_rule(mut self, rule: BandwidthRule) -> Self {
        self.rule = rule;

        self
    }

    pub fn rule(&self) -> BandwidthRule {
        self.rule
    }

    /// Latency between `a` and `b` in seconds.
    pub fn latency(&self, a: Region, b: Region) -> Result<f64, NetworkConfigError> {
        self.latency
            .get(&(a, b))
            .or_else(|| self.latency.get(&(b, a)))
            .copied()
            .ok_or(NetworkConfigError::MissingLatency(a, b))
    }

    /// Effective throughput from `from` to `to` in bytes per second. Never
    /// exceeds the sender's upload or the receiver's download.
    pub fn bandwidth(
        &self,
        from: Region,
        to: Region,
    ) -> Result<f64, NetworkConfigError> {
        let forward = self.directional_cap(from, to)?;
        match self.rule {
            BandwidthRule::Directional => Ok(forward),
            BandwidthRule::Symmetric => {
                Ok(forward.min(self.directional_cap(to, from)?))
            }
        }
    }

    fn directional_cap(
        &self,
        from: Region,
        to: Region,
    ) -> Result<f64, NetworkConfigError> {
        let sender =
            self.speed.get(&from).ok_or(NetworkConfigError::MissingSpeed(from))?;
        let receiver =
            self.speed.get(&to).ok_or(NetworkConfigError::MissingSpeed(to))?;

        Ok(sender.up.min(receiver.down))
    }

    /// Seconds needed to move `size` bytes from `from` to `to`.
    pub fn delay(
        &self,
        from: Region,
        to: Region,
        size: f64,
    ) -> Result<f64, NetworkConfigError> {
        Ok(self.latency(from, to)? + size / self.bandwidth(from, to)?)
    }

    /// Checks that every pair of the given regions (each region with itself
    /// included) has a valid latency and bandwidth.
    pub fn validate<I>(&self, regions: I) -> Result<(), NetworkConfigError>
    where
        I: IntoIterator<Item = Region>,
    {
        let mut regions: Vec<Region> = regions.into_iter().collect();
        regions.sort();
        regions.dedup();

        for &a in &regions {
            for &b in &regions {
                let latency = self.latency(a, b)?;
                if latency.is_nan() || latency < 0.0 {
                    return Err(NetworkConfigError::BadLatency { a, b, latency });
                }

                let bandwidth = self.bandwidth(a, b)?;
                if bandwidth.is_nan() || bandwidth <= 0.0 {
                    return Err(NetworkConfigError::BadBandwidth {
                        from: a,
                        to: b,
                        bandwidth,
                    });
                }
            }
        }

        Ok(())
    }

    /// Link speeds from testmy.net and pings from wondernetwork.com, 2021.
    pub fn bitcoin_2021() -> Self {
        use Region::*;

        const SPEEDS: [(Region, f64, f64); 9] = [
            // (region, up, down) in Mbps
            (CH, 23.6, 31.6),
            (US, 19.2, 55.3),
            (RU, 20.2, 23.1),
            (KZ, 8.0, 12.9),
            (ML, 19.4, 25.1),
            (CN, 14.6, 59.0),
            (GE, 24.5, 63.4),
            (NR, 17.6, 37.5),
            (VN, 3.5, 7.7),
        ];

        const PINGS: [(Region, Region, f64); 36] = [
            (US, CH, 235.0),
            (US, RU, 118.0),
            (US, KZ, 182.0),
            (US, ML, 364.0),
            (US, CN, 63.0),
            (US, GE, 92.0),
            (US, NR, 97.0),
            (US, VN, 59.0),
            (CH, RU, 119.0),
            (CH, KZ, 305.0),
            (CH, ML, 174.0),
            (CH, CN, 161.0),
            (CH, GE, 227.0),
            (CH, NR, 241.0),
            (CH, VN, 161.0),
            (RU, KZ, 70.0),
            (RU, ML, 326.0),
            (RU, CN, 191.0),
            (RU, GE, 43.0),
            (RU, NR, 48.0),
            (RU, VN, 173.0),
            (KZ, ML, 406.0),
            (KZ, CN, 241.0),
            (KZ, GE, 106.0),
            (KZ, NR, 84.0),
            (KZ, VN, 219.0),
            (ML, CN, 220.0),
            (ML, GE, 242.0),
            (ML, NR, 223.0),
            (ML, VN, 651.0),
            (CN, GE, 154.0),
            (CN, NR, 179.0),
            (CN, VN, 109.0),
            (GE, NR, 35.0),
            (GE, VN, 144.0),
            (NR, VN, 165.0),
        ];

        let mut model = Self::empty();
        for (region, up, down) in SPEEDS {
            model = model
                .with_speed(region, LinkSpeed::from_mbps(up, down))
                .with_latency(region, region, 0.0);
        }
        for (a, b, millis) in PINGS {
            model = model.with_latency(a, b, millis);
        }

        model
    }
}
