//! Power readings from a Cirrus CS5480 metering chip on an Ember test board.
//!
//! The chip is reached through the Ember debug shell: `em3xx_load
//! --isachan=all` opens the ISA channels and exposes the shell over telnet,
//! `cu cs5480_pload` makes the chip print its raw RMS registers, and those
//! are scaled into amps and volts with the calibration references.
//!
//! ```no_run
//! # async fn demo() -> Result<(), cirrus_pload::PloadError> {
//! let config = cirrus_pload::PloadConfig::default();
//! let reading = cirrus_pload::run_once(&config).await?;
//! println!("{}", reading.to_record());
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod gateway;
pub mod reading;
pub mod register;
pub mod response;
pub mod session;

pub use channel::{CommandChannel, TelnetChannel};
pub use config::{CalibrationReference, PloadConfig};
pub use error::PloadError;
pub use gateway::{ChannelGateway, GatewayProcess, GatewayState};
pub use reading::Reading;
pub use response::{Field, RawRegisterPair};
pub use session::{AcquisitionSession, pload_command, run_once};
