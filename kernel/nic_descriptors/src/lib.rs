//! The descriptor records software and the NIC exchange through rings in
//! host memory.
//!
//! Each descriptor is two 64-bit words that mean different things depending
//! on who wrote them last: software writes the "read" layout (buffer
//! addresses, commands) and hardware overwrites the same bytes with the
//! "write-back" layout (lengths, status, errors) when it completes the
//! descriptor. Both views are exposed as typed accessors over the same
//! volatile words; nothing here reinterprets memory unchecked.
//!
//! The write-back setters exist for the device side of the ring: platform
//! glue or a software device model uses them to complete descriptors the
//! way real silicon would.

#![cfg_attr(not(test), no_std)]

use bit_field::BitField;
use bitflags::bitflags;
use core::fmt;
use nic_hal::DeviceAddress;
use volatile::Volatile;

bitflags! {
    /// Status bits of a receive write-back.
    ///
    /// Bits 4 and up share storage with the continuation index (see
    /// [`AdvancedRxDescriptor::next_index`]): a non-final descriptor of a
    /// coalesced receive carries the index there, and its checksum bits are
    /// meaningless. Software reads the index only when `EOP` is clear and
    /// the checksum bits only when `EOP` is set, matching how the hardware
    /// reuses the field.
    pub struct RxStatus: u32 {
        /// Descriptor done: hardware has written this descriptor back.
        const DD            = 1 << 0;
        /// This descriptor completes its packet.
        const EOP           = 1 << 1;
        /// A VLAN tag was stripped and posted in the descriptor.
        const VLAN_PRESENT  = 1 << 2;
        /// Hardware validated the IP header checksum.
        const IP_CHECKED    = 1 << 4;
        /// Hardware validated the L4 (TCP/UDP) checksum.
        const L4_CHECKED    = 1 << 5;
        /// The validated L4 checksum belonged to a UDP header.
        const UDP_CHECKSUM  = 1 << 6;
    }
}

bitflags! {
    /// Error bits of a receive write-back.
    pub struct RxError: u32 {
        /// The IP header checksum was wrong.
        const IP_ERROR = 1 << 0;
        /// The L4 checksum was wrong.
        const L4_ERROR = 1 << 1;
    }
}

/// Everything the device reports when completing one receive descriptor.
/// Used by device models to compose a write-back; the engine reads the same
/// fields through the individual getters.
#[derive(Clone, Copy, Debug)]
pub struct RxWriteBack {
    pub packet_len: u16,
    pub header_len: u16,
    /// Whether hardware identified and split off the header.
    pub split_header: bool,
    /// Ring index of the descriptor continuing this packet; meaningful only
    /// when `EOP` is clear.
    pub next_index: u16,
    pub status: RxStatus,
    pub error: RxError,
    pub vlan_tag: u16,
}

impl Default for RxWriteBack {
    fn default() -> RxWriteBack {
        RxWriteBack {
            packet_len: 0,
            header_len: 0,
            split_header: false,
            next_index: 0,
            status: RxStatus::empty(),
            error: RxError::empty(),
            vlan_tag: 0,
        }
    }
}

/// Advanced receive descriptor: two 64-bit words holding either the two
/// buffer addresses (read layout, software-written) or the completion
/// information (write-back layout, hardware-written).
#[repr(C)]
pub struct AdvancedRxDescriptor {
    lower: Volatile<u64>,
    upper: Volatile<u64>,
}

impl Default for AdvancedRxDescriptor {
    fn default() -> AdvancedRxDescriptor {
        AdvancedRxDescriptor {
            lower: Volatile::new(0),
            upper: Volatile::new(0),
        }
    }
}

impl AdvancedRxDescriptor {
    /// Read-layout write: posts the packet (payload) and header buffer
    /// addresses, clearing any stale write-back content in the process.
    /// Must be called every time the slot returns to hardware ownership,
    /// because write-back destroyed the previous addresses.
    pub fn set_buffer_addresses(&mut self, packet: DeviceAddress, header: DeviceAddress) {
        self.lower.write(packet.0);
        self.upper.write(header.0);
    }

    /// Zeroes both words.
    pub fn clear(&mut self) {
        self.lower.write(0);
        self.upper.write(0);
    }

    // Write-back layout getters.

    pub fn status(&self) -> RxStatus {
        RxStatus::from_bits_truncate(self.upper.read().get_bits(0..20) as u32)
    }

    pub fn error(&self) -> RxError {
        RxError::from_bits_truncate(self.upper.read().get_bits(20..32) as u32)
    }

    pub fn descriptor_done(&self) -> bool {
        self.status().contains(RxStatus::DD)
    }

    pub fn end_of_packet(&self) -> bool {
        self.status().contains(RxStatus::EOP)
    }

    /// Bytes the hardware posted to the packet (payload) buffer.
    pub fn packet_len(&self) -> u16 {
        self.upper.read().get_bits(32..48) as u16
    }

    /// Bytes the hardware posted to the header buffer. Untrusted; callers
    /// clamp it to the header buffer size.
    pub fn header_len(&self) -> u16 {
        self.lower.read().get_bits(21..31) as u16
    }

    /// Whether hardware found the header boundary and split the packet.
    pub fn split_header(&self) -> bool {
        self.lower.read().get_bit(31)
    }

    /// Ring index of the descriptor that continues this packet, stored in
    /// the bits the status field doesn't use. Valid only when
    /// [`end_of_packet`](Self::end_of_packet) is false.
    pub fn next_index(&self) -> u16 {
        self.upper.read().get_bits(4..20) as u16
    }

    /// The stripped VLAN tag; valid only with [`RxStatus::VLAN_PRESENT`].
    pub fn vlan_tag(&self) -> u16 {
        self.upper.read().get_bits(48..64) as u16
    }

    // Write-back layout setter, for the device side.

    /// Overwrites the descriptor with a completed write-back, exactly as
    /// hardware would (the buffer addresses are destroyed).
    pub fn write_back(&mut self, wb: &RxWriteBack) {
        let mut lower = 0u64;
        lower.set_bits(21..31, u64::from(wb.header_len) & 0x3FF);
        lower.set_bit(31, wb.split_header);
        self.lower.write(lower);

        let mut upper = 0u64;
        upper.set_bits(0..20, u64::from(wb.status.bits()));
        if !wb.status.contains(RxStatus::EOP) {
            upper.set_bits(4..20, u64::from(wb.next_index));
        }
        upper.set_bits(20..32, u64::from(wb.error.bits()));
        upper.set_bits(32..48, u64::from(wb.packet_len));
        upper.set_bits(48..64, u64::from(wb.vlan_tag));
        self.upper.write(upper);
    }
}

impl fmt::Debug for AdvancedRxDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{lower: {:#X}, upper: {:#X}}}",
            self.lower.read(),
            self.upper.read()
        )
    }
}

/// Options for one transmit data descriptor.
#[derive(Clone, Copy, Default, Debug)]
pub struct TxDescOptions {
    /// This descriptor carries the last bytes of its packet.
    pub end_of_packet: bool,
    /// Hardware should write status back when this descriptor completes.
    pub report_status: bool,
    /// Insert the VLAN tag programmed in the active context.
    pub insert_vlan: bool,
    /// Insert the IP header checksum per the active context.
    pub insert_ip_checksum: bool,
    /// Insert the L4 checksum per the active context.
    pub insert_l4_checksum: bool,
    /// Segment the packet per the active TSO context.
    pub segment: bool,
    /// Which previously-programmed context (0 or 1) the offloads refer to.
    pub context_index: u8,
    /// Total payload length of the whole packet, needed by the offload
    /// engine; only meaningful on a packet's first data descriptor.
    pub payload_len: u32,
}

// Bit positions within the `meta` word of a transmit descriptor.
const TX_LEN_RANGE: core::ops::Range<usize> = 0..16;
const TX_DTYP_RANGE: core::ops::Range<usize> = 20..24;
const TX_CMD_EOP: usize = 24;
const TX_CMD_RS: usize = 27;
const TX_CMD_DEXT: usize = 29;
const TX_CMD_VLE: usize = 30;
const TX_CMD_TSE: usize = 31;
const TX_STATUS_DD: usize = 32;
const TX_IDX_BIT: usize = 36;
const TX_POPTS_IXSM: usize = 40;
const TX_POPTS_TXSM: usize = 41;
const TX_PAYLEN_RANGE: core::ops::Range<usize> = 46..64;

const DTYP_DATA: u64 = 0x3;
const DTYP_CONTEXT: u64 = 0x2;

/// Advanced transmit descriptor. The same 16 bytes hold either a data
/// descriptor (a buffer address plus length/command/offload words) or a
/// context descriptor (offload parameters with no buffer); the descriptor
/// type field distinguishes them, and [`set_data`](Self::set_data) /
/// [`set_context`](Self::set_context) write the respective layouts.
#[repr(C)]
pub struct AdvancedTxDescriptor {
    address: Volatile<u64>,
    meta: Volatile<u64>,
}

impl Default for AdvancedTxDescriptor {
    fn default() -> AdvancedTxDescriptor {
        AdvancedTxDescriptor {
            address: Volatile::new(0),
            meta: Volatile::new(0),
        }
    }
}

impl AdvancedTxDescriptor {
    /// Writes a data descriptor pointing at `len` bytes of packet data.
    pub fn set_data(&mut self, addr: DeviceAddress, len: u16, opts: TxDescOptions) {
        self.address.write(addr.0);
        let mut meta = 0u64;
        meta.set_bits(TX_LEN_RANGE, u64::from(len));
        meta.set_bits(TX_DTYP_RANGE, DTYP_DATA);
        meta.set_bit(TX_CMD_DEXT, true);
        meta.set_bit(TX_CMD_EOP, opts.end_of_packet);
        meta.set_bit(TX_CMD_RS, opts.report_status);
        meta.set_bit(TX_CMD_VLE, opts.insert_vlan);
        meta.set_bit(TX_CMD_TSE, opts.segment);
        meta.set_bit(TX_IDX_BIT, opts.context_index != 0);
        meta.set_bit(TX_POPTS_IXSM, opts.insert_ip_checksum);
        meta.set_bit(TX_POPTS_TXSM, opts.insert_l4_checksum);
        meta.set_bits(TX_PAYLEN_RANGE, u64::from(opts.payload_len) & 0x3_FFFF);
        self.meta.write(meta);
    }

    /// Writes a context descriptor carrying offload parameters for
    /// subsequent data descriptors that reference `ctx.context_index`.
    pub fn set_context(&mut self, ctx: &TxContextFields) {
        let mut lengths = 0u64;
        lengths.set_bits(0..9, u64::from(ctx.ip_header_len));
        lengths.set_bits(9..16, u64::from(ctx.mac_header_len));
        lengths.set_bits(16..32, u64::from(ctx.vlan_tag));
        self.address.write(lengths);

        let mut meta = 0u64;
        meta.set_bits(TX_DTYP_RANGE, DTYP_CONTEXT);
        meta.set_bit(TX_CMD_DEXT, true);
        meta.set_bit(33, ctx.ipv4);
        meta.set_bit(34, ctx.l4_tcp);
        meta.set_bit(TX_IDX_BIT, ctx.context_index != 0);
        meta.set_bits(40..48, u64::from(ctx.l4_header_len));
        meta.set_bits(48..64, u64::from(ctx.mss));
        self.meta.write(meta);
    }

    /// Zeroes the descriptor, including any write-back status.
    pub fn clear(&mut self) {
        self.address.write(0);
        self.meta.write(0);
    }

    /// Clears only the write-back status bit.
    pub fn clear_status(&mut self) {
        let mut meta = self.meta.read();
        meta.set_bit(TX_STATUS_DD, false);
        self.meta.write(meta);
    }

    /// Write-back view: whether hardware has finished with this descriptor.
    /// Only descriptors written with `report_status` are ever marked.
    pub fn descriptor_done(&self) -> bool {
        self.meta.read().get_bit(TX_STATUS_DD)
    }

    /// Device-side setter: marks the descriptor complete as hardware would.
    pub fn mark_done(&mut self) {
        let mut meta = self.meta.read();
        meta.set_bit(TX_STATUS_DD, true);
        self.meta.write(meta);
    }

    /// Whether this slot currently holds a context descriptor.
    pub fn is_context(&self) -> bool {
        self.meta.read().get_bits(TX_DTYP_RANGE) == DTYP_CONTEXT
    }

    pub fn data_len(&self) -> u16 {
        self.meta.read().get_bits(TX_LEN_RANGE) as u16
    }

    pub fn end_of_packet(&self) -> bool {
        self.meta.read().get_bit(TX_CMD_EOP)
    }
}

impl fmt::Debug for AdvancedTxDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{address: {:#X}, meta: {:#X}}}",
            self.address.read(),
            self.meta.read()
        )
    }
}

/// The offload parameters a context descriptor programs into the hardware.
#[derive(Clone, Copy, Default, Debug)]
pub struct TxContextFields {
    pub mac_header_len: u8,
    pub ip_header_len: u8,
    pub l4_header_len: u8,
    /// Segment size for TSO; 0 for a checksum-only context.
    pub mss: u16,
    pub ipv4: bool,
    pub l4_tcp: bool,
    pub vlan_tag: u16,
    /// 0 for the plain-checksum context, 1 for the active TSO context.
    pub context_index: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use nic_hal::DeviceAddress;

    #[test]
    fn rx_views_round_trip() {
        let mut desc = AdvancedRxDescriptor::default();
        desc.set_buffer_addresses(DeviceAddress(0x1000), DeviceAddress(0x2000));
        assert!(!desc.descriptor_done());

        desc.write_back(&RxWriteBack {
            packet_len: 1400,
            header_len: 54,
            split_header: true,
            status: RxStatus::DD | RxStatus::EOP | RxStatus::IP_CHECKED | RxStatus::L4_CHECKED,
            ..Default::default()
        });
        assert!(desc.descriptor_done());
        assert!(desc.end_of_packet());
        assert!(desc.split_header());
        assert_eq!(desc.packet_len(), 1400);
        assert_eq!(desc.header_len(), 54);
        assert!(desc.status().contains(RxStatus::L4_CHECKED));
        assert!(desc.error().is_empty());
    }

    #[test]
    fn rx_continuation_carries_next_index() {
        let mut desc = AdvancedRxDescriptor::default();
        desc.write_back(&RxWriteBack {
            packet_len: 1400,
            next_index: 17,
            status: RxStatus::DD,
            ..Default::default()
        });
        assert!(desc.descriptor_done());
        assert!(!desc.end_of_packet());
        assert_eq!(desc.next_index(), 17);
    }

    #[test]
    fn rx_vlan_and_errors() {
        let mut desc = AdvancedRxDescriptor::default();
        desc.write_back(&RxWriteBack {
            packet_len: 60,
            status: RxStatus::DD | RxStatus::EOP | RxStatus::VLAN_PRESENT | RxStatus::L4_CHECKED,
            error: RxError::L4_ERROR,
            vlan_tag: 42,
            ..Default::default()
        });
        assert_eq!(desc.vlan_tag(), 42);
        assert!(desc.error().contains(RxError::L4_ERROR));
    }

    #[test]
    fn tx_data_descriptor_round_trip() {
        let mut desc = AdvancedTxDescriptor::default();
        desc.set_data(
            DeviceAddress(0xABCD),
            1500,
            TxDescOptions {
                end_of_packet: true,
                report_status: true,
                ..Default::default()
            },
        );
        assert!(!desc.is_context());
        assert_eq!(desc.data_len(), 1500);
        assert!(desc.end_of_packet());
        assert!(!desc.descriptor_done());
        desc.mark_done();
        assert!(desc.descriptor_done());
        desc.clear_status();
        assert!(!desc.descriptor_done());
        assert_eq!(desc.data_len(), 1500);
    }

    #[test]
    fn tx_context_descriptor_is_distinguishable() {
        let mut desc = AdvancedTxDescriptor::default();
        desc.set_context(&TxContextFields {
            mac_header_len: 14,
            ip_header_len: 20,
            l4_header_len: 20,
            mss: 1460,
            ipv4: true,
            l4_tcp: true,
            context_index: 1,
            ..Default::default()
        });
        assert!(desc.is_context());
        desc.clear();
        assert!(!desc.is_context());
    }
}
