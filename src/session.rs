use std::time::Duration;

use tokio::time;
use tracing::{debug, info, warn};

use crate::channel::{CommandChannel, TelnetChannel};
use crate::config::{CalibrationReference, PloadConfig};
use crate::error::PloadError;
use crate::gateway::ChannelGateway;
use crate::reading::Reading;
use crate::response;

/// Builds the pload command for a chip command prefix, e.g.
/// `cu cs5480` -> `cu cs5480_pload`
pub fn pload_command(prefix: &str) -> String {
    format!("{}_pload", prefix)
}

/// One command/response exchange with the metering chip
#[derive(Debug, Clone)]
pub struct AcquisitionSession {
    command: String,
    settle_delay: Duration,
    calibration: CalibrationReference,
}

impl AcquisitionSession {
    pub fn new(command: String, settle_delay: Duration, calibration: CalibrationReference) -> Self {
        AcquisitionSession {
            command,
            settle_delay,
            calibration,
        }
    }

    pub fn from_config(config: &PloadConfig) -> Self {
        Self::new(config.command(), config.settle_delay(), config.calibration)
    }

    /// Sends the pload command, waits for the chip to answer and converts
    /// the IRMS/VRMS registers it prints.
    ///
    /// The response is read once, after the settle delay. Nothing is
    /// retried.
    pub async fn acquire<C: CommandChannel>(&self, channel: &mut C) -> Result<Reading, PloadError> {
        debug!("Send cmd: {}", self.command);
        channel.write_line(&self.command).await?;

        time::sleep(self.settle_delay).await;

        let raw = channel.read_available().await?;
        if raw.is_empty() {
            return Err(PloadError::NoData);
        }
        debug!("Data received: {}", raw);

        let (current, voltage) = response::parse(&raw)?.decode()?;
        Ok(Reading::from_registers(current, voltage, &self.calibration))
    }
}

/// Takes a single reading end to end: clears out stale helpers, starts a
/// fresh one, talks to the chip over telnet, then stops the helper whether
/// or not the reading worked.
pub async fn run_once(config: &PloadConfig) -> Result<Reading, PloadError> {
    let gateway = ChannelGateway::new(config.gateway.clone());
    let session = AcquisitionSession::from_config(config);

    let killed = gateway.kill_stale_instances();
    if killed > 0 {
        debug!("Killed {} stale helper(s)", killed);
    }

    let process = gateway.open()?;

    let result = async {
        let mut channel = TelnetChannel::connect(
            &config.channel.endpoint(),
            config.channel.connect_timeout(),
            config.channel.read_timeout(),
        )
        .await?;
        session.acquire(&mut channel).await
    }
    .await;

    let closed = process.close().await;
    if let Err(e) = &closed {
        warn!("Failed to stop helper: {}", e);
    }

    let reading = result?;
    closed?;
    info!("{}", reading);
    Ok(reading)
}
