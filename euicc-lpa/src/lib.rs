//! Local profile assistant engine for eUICC secure elements
//!
//! Drives the ISD-R of an embedded SIM through the GSMA SGP.22 ES10 command
//! set: profile management, notifications, configured addresses and the
//! remote provisioning pipeline up to bound profile package installation.
//!
//! The secure element itself is reached through the [`SecureElement`]
//! trait, implemented by the host for its modem or reader. Every operation
//! opens a logical channel to the ISD-R, runs its STORE DATA exchange and
//! closes the channel again; exchanges on one port never interleave.
//!
//! ```ignore
//! let config = LpaConfig::load(None)?;
//! let port = Arc::new(EuiccPort::new(element, config, None)?);
//! let card = EuiccCard::start(Arc::clone(&port), None, &tokio::runtime::Handle::current());
//!
//! for profile in port.get_all_profiles().await? {
//!     println!("{} {:?}", profile.iccid, profile.state);
//! }
//! ```

// Core modules
pub mod apdu;
pub mod bcd;
pub mod card;
pub mod channel;
pub mod config;
pub mod error;
pub mod port;
pub mod tlv;

pub use card::{EuiccCard, SpecVersion};
pub use channel::SecureElement;
pub use config::LpaConfig;
pub use error::{EuiccError, Operation, Result};
pub use port::EuiccPort;
