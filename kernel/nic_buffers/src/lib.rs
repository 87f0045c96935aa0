//! Buffers that are used to send and receive packets, and the pool that
//! recycles receive-side memory.
//!
//! Receive memory comes in two shapes: small linear header buffers and
//! page-sized payload buffers that are handed to hardware one half at a time.
//! Both are checked out of an [`RxBufferPool`] and return to it automatically
//! when the last owner drops them, so a ring that failed to refill under
//! memory pressure heals itself as soon as buffers drain back in.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::{boxed::Box, sync::Arc, vec, vec::Vec};
use core::mem;
use core::ops::{Deref, DerefMut};
use log::error;
use nic_hal::{DeviceAddress, QueueId};

/// Size of one receive payload page.
pub const PAGE_SIZE: usize = 4096;
/// Payload pages are given to hardware in halves so a page whose first half
/// is still in flight upward can have its second half re-posted.
pub const HALF_PAGE: usize = PAGE_SIZE / 2;

/// The transport protocol a checksum/TSO context applies to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum L4Protocol {
    Tcp,
    Udp,
}

/// Parameters for checksum insertion offload.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ChecksumContext {
    pub ipv4: bool,
    pub protocol: L4Protocol,
    pub mac_header_len: u8,
    pub ip_header_len: u8,
}

/// Parameters for TCP segmentation offload: the hardware replicates the
/// headers described here onto every wire segment it cuts from the payload.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TsoContext {
    pub checksum: ChecksumContext,
    pub l4_header_len: u8,
    /// Maximum segment size: payload bytes per wire frame.
    pub mss: u16,
}

impl TsoContext {
    /// Total header length replicated per wire segment (MAC + IP + L4).
    pub fn header_len(&self) -> usize {
        self.checksum.mac_header_len as usize
            + self.checksum.ip_header_len as usize
            + self.l4_header_len as usize
    }

    /// How many wire frames this packet becomes, given its total length.
    pub fn wire_segments(&self, packet_len: usize) -> usize {
        let payload = packet_len.saturating_sub(self.header_len());
        if payload == 0 || self.mss == 0 {
            1
        } else {
            payload.div_ceil(self.mss as usize)
        }
    }
}

/// The offload work requested for one outgoing packet.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TxOffload {
    None,
    Checksum(ChecksumContext),
    Tso(TsoContext),
}

/// An outgoing packet handed to the transmit engine: a linear head
/// (headers plus any small payload) and zero or more scatter-gather
/// fragments, with the offload treatment the stack requested.
pub struct TransmitPacket {
    pub head: Box<[u8]>,
    pub frags: Vec<Box<[u8]>>,
    pub offload: TxOffload,
    /// VLAN tag to insert on the wire, if any.
    pub vlan_tag: Option<u16>,
}

impl TransmitPacket {
    pub fn new(head: Box<[u8]>) -> TransmitPacket {
        TransmitPacket {
            head,
            frags: Vec::new(),
            offload: TxOffload::None,
            vlan_tag: None,
        }
    }

    /// Total packet length across the head and all fragments.
    pub fn len(&self) -> usize {
        self.head.len() + self.frags.iter().map(|f| f.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether submitting this packet requires a context descriptor before
    /// its data descriptors.
    pub fn needs_context(&self) -> bool {
        self.vlan_tag.is_some() || !matches!(self.offload, TxOffload::None)
    }
}

type Storage = Box<[u8]>;
type FreeList = Arc<mpmc::Queue<Storage>>;

/// A linear buffer checked out of an [`RxBufferPool`], used for packet
/// headers (split mode) or whole packets (single-buffer mode).
/// Auto-dereferences into a byte slice of its current length.
/// When dropped, its storage automatically returns to the pool.
pub struct ReceiveBuffer {
    storage: Storage,
    length: u16,
    /// Set while the hardware holds a DMA lease on this buffer; cleared as
    /// soon as the mapping is released so a reclaim can never unmap twice.
    pub device_addr: Option<DeviceAddress>,
    pool: FreeList,
}

impl ReceiveBuffer {
    /// The full writable capacity, regardless of the current length.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    /// Sets the buffer's length, after hardware reports how many bytes it
    /// actually wrote. Fails if the length exceeds the storage capacity.
    pub fn set_length(&mut self, length: u16) -> Result<(), &'static str> {
        if usize::from(length) > self.storage.len() {
            Err("ReceiveBuffer::set_length(): length exceeds buffer capacity")
        } else {
            self.length = length;
            Ok(())
        }
    }

    /// Takes the device address, leaving `None` behind. The caller must
    /// unmap exactly the returned address.
    pub fn take_device_addr(&mut self) -> Option<DeviceAddress> {
        self.device_addr.take()
    }
}

impl Deref for ReceiveBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.storage[..usize::from(self.length)]
    }
}

impl DerefMut for ReceiveBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.storage[..usize::from(self.length)]
    }
}

impl Drop for ReceiveBuffer {
    fn drop(&mut self) {
        if self.device_addr.is_some() {
            error!(
                "ReceiveBuffer::drop(): buffer dropped while still mapped for the device (addr {:?})",
                self.device_addr
            );
        }
        let storage = mem::take(&mut self.storage);
        if !storage.is_empty() && self.pool.push(storage).is_err() {
            // The pool is full; the storage is simply freed.
            error!("ReceiveBuffer::drop(): couldn't return storage to pool");
        }
    }
}

/// A payload page shared between a ring slot and any delivered frames still
/// referencing a slice of it. The backing storage returns to its pool when
/// the last [`PageRef`] drops.
pub struct RxPage {
    data: Storage,
    pool: FreeList,
}

impl Drop for RxPage {
    fn drop(&mut self) {
        let data = mem::take(&mut self.data);
        if !data.is_empty() && self.pool.push(data).is_err() {
            error!("RxPage::drop(): couldn't return page to pool");
        }
    }
}

/// Shared handle to one [`RxPage`].
#[derive(Clone)]
pub struct PageRef(Arc<RxPage>);

impl PageRef {
    /// Whether this handle is the only one outstanding, i.e. no delivered
    /// frame still references the page. Only then may the ring re-post the
    /// page's other half to hardware.
    pub fn is_exclusive(&self) -> bool {
        Arc::strong_count(&self.0) == 1
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0.data
    }
}

/// The pool of receive memory for one adapter, shared by all of its receive
/// queues. Free lists are bounded and populated once at bring-up; an empty
/// list models allocation failure under memory pressure, which callers
/// absorb into statistics and retry later.
#[derive(Clone)]
pub struct RxBufferPool {
    buffers: FreeList,
    pages: FreeList,
    buffer_len: usize,
}

impl RxBufferPool {
    /// Creates a pool holding `num_buffers` linear buffers of `buffer_len`
    /// bytes and `num_pages` payload pages.
    pub fn new(num_buffers: usize, buffer_len: usize, num_pages: usize) -> RxBufferPool {
        let buffers = Arc::new(mpmc::Queue::with_capacity(num_buffers.max(1)));
        for _ in 0..num_buffers {
            let _ = buffers.push(vec![0u8; buffer_len].into_boxed_slice());
        }
        let pages = Arc::new(mpmc::Queue::with_capacity(num_pages.max(1)));
        for _ in 0..num_pages {
            let _ = pages.push(vec![0u8; PAGE_SIZE].into_boxed_slice());
        }
        RxBufferPool {
            buffers,
            pages,
            buffer_len,
        }
    }

    /// The length of the linear buffers this pool hands out.
    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    /// Checks a linear buffer out of the pool.
    /// `None` means the pool is exhausted; try again on the next pass.
    pub fn take_buffer(&self) -> Option<ReceiveBuffer> {
        self.buffers.pop().map(|storage| {
            let length = storage.len() as u16;
            ReceiveBuffer {
                storage,
                length,
                device_addr: None,
                pool: self.buffers.clone(),
            }
        })
    }

    /// Checks a payload page out of the pool.
    pub fn take_page(&self) -> Option<PageRef> {
        self.pages.pop().map(|data| {
            PageRef(Arc::new(RxPage {
                data,
                pool: self.pages.clone(),
            }))
        })
    }
}

/// The checksum validation outcome the hardware reported for a received
/// packet, passed upward so the stack can skip software verification.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ChecksumVerdict {
    /// Hardware did not check (offload disabled, unknown protocol, or a
    /// known-unreliable case); software must verify.
    Unverified,
    Good,
    Bad,
}

/// One piece of a received frame.
pub enum RxFragment {
    /// A linear buffer, delivered whole.
    Linear(ReceiveBuffer),
    /// A window into a shared payload page, attached without copying.
    Paged {
        page: PageRef,
        offset: usize,
        len: usize,
    },
}

impl RxFragment {
    pub fn len(&self) -> usize {
        match self {
            RxFragment::Linear(buf) => usize::from(buf.length()),
            RxFragment::Paged { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A fully reassembled network frame, ready for the layer above.
/// Frames assembled from multiple descriptors carry multiple fragments;
/// `total_len` is always the sum of the fragment lengths.
pub struct ReceivedFrame {
    pub frags: Vec<RxFragment>,
    pub total_len: usize,
    pub checksum: ChecksumVerdict,
    /// VLAN tag the hardware stripped from the frame, if any.
    pub vlan_tag: Option<u16>,
}

impl ReceivedFrame {
    pub fn empty() -> ReceivedFrame {
        ReceivedFrame {
            frags: Vec::new(),
            total_len: 0,
            checksum: ChecksumVerdict::Unverified,
            vlan_tag: None,
        }
    }

    /// Appends one fragment, keeping `total_len` consistent.
    pub fn push_fragment(&mut self, frag: RxFragment) {
        self.total_len += frag.len();
        self.frags.push(frag);
    }
}

/// Where completed receive frames go: the upward edge of the engine.
/// Exactly one call is made per fully reassembled frame, and ownership of
/// the frame transfers irrevocably.
pub trait FrameDelivery {
    fn deliver(&mut self, frame: ReceivedFrame, queue: QueueId);
}
