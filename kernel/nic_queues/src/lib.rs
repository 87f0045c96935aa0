//! The ring engine shared by the transmit and receive paths: cursor
//! bookkeeping ([`ring::Ring`]), the transmit submit/clean state machines
//! ([`tx::TxQueue`]), and the receive refill/harvest state machines
//! including multi-descriptor reassembly ([`rx::RxQueue`]).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod ring;
pub mod rx;
pub mod tx;

pub use ring::Ring;
pub use rx::{HarvestSummary, RxBufferMode, RxChecksumCaps, RxQueue, RxQueueStats};
pub use tx::{CleanSummary, TransmitResult, TxQueue, TxQueueStats};
