extern crate std;

use core::{
    cell::{Cell, RefCell},
    convert::Infallible,
};
use std::{collections::BTreeMap, collections::VecDeque, rc::Rc, vec, vec::Vec};

use embedded_hal::{
    delay::DelayNs,
    digital::{ErrorType as PinErrorType, InputPin, OutputPin},
    spi::{ErrorKind, ErrorType as SpiErrorType, SpiBus},
};

use super::{csd::Csd, DetectActiveLow, SdCardVersion, SpiCard, SpiCardError, SD_SECTOR_SIZE};
use crate::card::{CardDriver, CardType};
#[cfg(feature = "write")]
use crate::disk::{DiskIo, SdDisk, StatusFlags};

enum WriteStage {
    Idle,
    WaitToken { block: u64 },
    Data { block: u64, buf: Vec<u8> },
    Crc { block: u64, buf: Vec<u8>, left: u8 },
}

/// SD card answering the SPI-mode command set byte by byte.
struct CardSim {
    version: SdCardVersion,
    high_capacity: bool,
    responsive: bool,
    stall_reads: bool,
    /// Extra 0xFF bytes before each read data token.
    token_delay: usize,
    /// Busy bytes after each accepted write block.
    write_busy: usize,
    acmd41_busy: u32,
    csd: Csd,
    rates: Vec<u32>,
    blocks: u64,
    selected: bool,
    app_cmd: bool,
    cmd_buf: Vec<u8>,
    out: VecDeque<u8>,
    write: WriteStage,
    storage: BTreeMap<u64, Vec<u8>>,
    commands: Vec<(u8, u32)>,
}

impl CardSim {
    fn v2(blocks_512k: u32) -> Self {
        let mut csd = Csd([0; 16]);
        csd.set_bits(127, 126, 1);
        csd.set_bits(69, 48, blocks_512k - 1);
        Self::with_csd(SdCardVersion::V2, true, csd)
    }

    fn v1() -> Self {
        let mut csd = Csd([0; 16]);
        csd.set_bits(127, 126, 0);
        csd.set_bits(83, 80, 9);
        csd.set_bits(73, 62, 255);
        csd.set_bits(49, 47, 0);
        Self::with_csd(SdCardVersion::V1, false, csd)
    }

    fn with_csd(version: SdCardVersion, high_capacity: bool, csd: Csd) -> Self {
        let blocks = csd.capacity_bytes().unwrap() / SD_SECTOR_SIZE as u64;
        Self {
            version,
            high_capacity,
            responsive: true,
            stall_reads: false,
            token_delay: 0,
            write_busy: 2,
            acmd41_busy: 0,
            csd,
            rates: Vec::new(),
            blocks,
            selected: false,
            app_cmd: false,
            cmd_buf: Vec::new(),
            out: VecDeque::new(),
            write: WriteStage::Idle,
            storage: BTreeMap::new(),
            commands: Vec::new(),
        }
    }

    fn exchange(&mut self, byte: u8) -> u8 {
        if !self.selected || !self.responsive {
            return 0xFF;
        }
        if self.receive_write_data(byte) {
            return 0xFF;
        }
        if !self.cmd_buf.is_empty() || (byte & 0xC0) == 0x40 {
            self.cmd_buf.push(byte);
            if self.cmd_buf.len() == 6 {
                let frame = core::mem::take(&mut self.cmd_buf);
                let cmd = frame[0] & 0x3F;
                let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
                self.out.clear();
                self.execute(cmd, arg);
            }
            return 0xFF;
        }
        self.out.pop_front().unwrap_or(0xFF)
    }

    fn receive_write_data(&mut self, byte: u8) -> bool {
        match core::mem::replace(&mut self.write, WriteStage::Idle) {
            WriteStage::Idle => false,
            WriteStage::WaitToken { block } => {
                if byte == 0xFE {
                    self.write = WriteStage::Data {
                        block,
                        buf: Vec::new(),
                    };
                    return true;
                }
                // R1 of CMD24 is still being clocked out.
                self.write = WriteStage::WaitToken { block };
                false
            }
            WriteStage::Data { block, mut buf } => {
                buf.push(byte);
                self.write = if buf.len() == SD_SECTOR_SIZE {
                    WriteStage::Crc {
                        block,
                        buf,
                        left: 2,
                    }
                } else {
                    WriteStage::Data { block, buf }
                };
                true
            }
            WriteStage::Crc { block, buf, left } => {
                if left > 1 {
                    self.write = WriteStage::Crc {
                        block,
                        buf,
                        left: left - 1,
                    };
                } else {
                    self.storage.insert(block, buf);
                    self.out.push_back(0x05);
                    self.out.extend(core::iter::repeat(0x00).take(self.write_busy));
                }
                true
            }
        }
    }

    fn block_of(&self, arg: u32) -> u64 {
        if self.high_capacity {
            arg as u64
        } else {
            arg as u64 / SD_SECTOR_SIZE as u64
        }
    }

    fn execute(&mut self, cmd: u8, arg: u32) {
        self.commands.push((cmd, arg));
        let app_cmd = core::mem::take(&mut self.app_cmd);
        let mut reply = vec![0xFF];
        match (cmd, app_cmd) {
            (0, _) => reply.push(0x01),
            (8, _) => match self.version {
                SdCardVersion::V2 => reply.extend([0x01, 0x00, 0x00, 0x01, 0xAA]),
                SdCardVersion::V1 => reply.push(0x05),
            },
            (55, _) => {
                self.app_cmd = true;
                reply.push(0x01);
            }
            (41, true) => {
                if self.acmd41_busy > 0 {
                    self.acmd41_busy -= 1;
                    reply.push(0x01);
                } else {
                    reply.push(0x00);
                }
            }
            (16, _) => reply.push(0x00),
            (58, _) => {
                let ccs = if self.high_capacity { 0xC0 } else { 0x80 };
                reply.extend([0x00, ccs, 0xFF, 0x80, 0x00]);
            }
            (9, _) => {
                reply.extend([0x00, 0xFF, 0xFE]);
                reply.extend(self.csd.0);
                reply.extend([0xFF, 0xFF]);
            }
            (17, _) => {
                let block = self.block_of(arg);
                if block >= self.blocks {
                    reply.push(0x20);
                } else {
                    reply.extend([0x00, 0xFF, 0xFF]);
                    reply.extend(core::iter::repeat(0xFF).take(self.token_delay));
                    if !self.stall_reads {
                        reply.push(0xFE);
                        match self.storage.get(&block) {
                            Some(data) => reply.extend(data.iter().copied()),
                            None => reply.extend(core::iter::repeat(0u8).take(SD_SECTOR_SIZE)),
                        }
                        reply.extend([0xFF, 0xFF]);
                    }
                }
            }
            (24, _) => {
                let block = self.block_of(arg);
                if block >= self.blocks {
                    reply.push(0x20);
                } else {
                    reply.push(0x00);
                    self.write = WriteStage::WaitToken { block };
                }
            }
            _ => reply.push(0x04),
        }
        self.out.extend(reply);
    }

    fn deselect(&mut self) {
        self.selected = false;
        self.cmd_buf.clear();
        self.out.clear();
    }
}

type Shared = Rc<RefCell<CardSim>>;

struct SimSpi(Shared);

impl SpiErrorType for SimSpi {
    type Error = Infallible;
}

impl SpiBus<u8> for SimSpi {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let mut sim = self.0.borrow_mut();
        for word in words {
            *word = sim.exchange(0xFF);
        }
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        let mut sim = self.0.borrow_mut();
        for &word in words {
            let _ = sim.exchange(word);
        }
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        let mut sim = self.0.borrow_mut();
        for idx in 0..read.len().max(write.len()) {
            let out = sim.exchange(write.get(idx).copied().unwrap_or(0xFF));
            if let Some(slot) = read.get_mut(idx) {
                *slot = out;
            }
        }
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let mut sim = self.0.borrow_mut();
        for word in words {
            *word = sim.exchange(*word);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

struct SimCs(Shared);

impl PinErrorType for SimCs {
    type Error = Infallible;
}

impl OutputPin for SimCs {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.borrow_mut().selected = true;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.0.borrow_mut().deselect();
        Ok(())
    }
}

struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

struct SimDetect(bool);

impl PinErrorType for SimDetect {
    type Error = Infallible;
}

impl InputPin for SimDetect {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.0)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.0)
    }
}

fn attach(sim: CardSim) -> (Shared, SpiCard<SimSpi, SimCs, NoDelay>) {
    let shared = Rc::new(RefCell::new(sim));
    let card = SpiCard::new(
        SimSpi(Rc::clone(&shared)),
        SimCs(Rc::clone(&shared)),
        NoDelay,
    );
    (shared, card)
}

#[test]
fn csd_v2_capacity_decodes() {
    let mut csd = Csd([0; 16]);
    csd.set_bits(127, 126, 1);
    csd.set_bits(69, 48, 15_159);
    assert_eq!(csd.bits(69, 48), 15_159);
    assert_eq!(csd.structure(), 1);
    assert_eq!(csd.capacity_bytes(), Some(15_160 * 512 * 1024));
}

#[test]
fn csd_bits_follow_register_numbering() {
    let mut raw = [0u8; 16];
    raw[0] = 0x40;
    raw[15] = 0x01;
    let csd = Csd(raw);
    assert_eq!(csd.bits(127, 126), 1);
    assert_eq!(csd.bits(0, 0), 1);
    assert_eq!(csd.bits(7, 1), 0);
}

#[test]
fn csd_v1_capacity_decodes() {
    let sim = CardSim::v1();
    assert_eq!(sim.csd.capacity_bytes(), Some(256 * 4 * 512));
}

#[test]
fn unknown_csd_structure_is_rejected() {
    let mut csd = Csd([0; 16]);
    csd.set_bits(127, 126, 3);
    assert_eq!(csd.capacity_bytes(), None);
}

#[test]
fn v2_card_initializes_as_high_capacity() {
    let (_sim, mut card) = attach(CardSim::v2(2));
    let info = card.init().unwrap();

    assert_eq!(info.card_type, CardType::SdhcSdxc);
    assert_eq!(info.version, 0x0200);
    assert_eq!(info.block_size, 512);
    assert_eq!(info.block_count, 2048);
    assert_eq!(card.card_info(), info);
    assert!(card.is_initialized());
}

#[test]
fn v1_card_initializes_with_block_length() {
    let (sim, mut card) = attach(CardSim::v1());
    let info = card.init().unwrap();

    assert_eq!(info.card_type, CardType::Sdsc);
    assert_eq!(info.version_major(), 1);
    assert_eq!(info.version_minor(), 0);
    assert!(sim.borrow().commands.iter().any(|&(cmd, arg)| cmd == 16 && arg == 512));
}

#[test]
fn acmd41_is_retried_while_card_is_busy() {
    let mut sim = CardSim::v2(1);
    sim.acmd41_busy = 5;
    let (sim, mut card) = attach(sim);
    card.init().unwrap();

    let acmd41 = sim.borrow().commands.iter().filter(|&&(cmd, _)| cmd == 41).count();
    assert_eq!(acmd41, 6);
}

#[test]
fn silent_card_fails_init_and_stays_uninitialized() {
    let mut sim = CardSim::v2(1);
    sim.responsive = false;
    let (_sim, mut card) = attach(sim);

    assert!(matches!(card.init(), Err(SpiCardError::NoResponse(0))));
    assert!(!card.is_initialized());
    assert_eq!(card.card_info().block_count, 0);
}

#[test]
fn transfers_before_init_are_refused() {
    let (_sim, mut card) = attach(CardSim::v2(1));
    let mut buf = [0u8; SD_SECTOR_SIZE];
    assert!(matches!(
        card.read_blocks(0, &mut buf, 1, 100),
        Err(SpiCardError::NotInitialized)
    ));
}

#[test]
fn buffer_length_must_match_count() {
    let (_sim, mut card) = attach(CardSim::v2(1));
    card.init().unwrap();
    let mut buf = [0u8; SD_SECTOR_SIZE];
    assert!(matches!(
        card.read_blocks(0, &mut buf, 2, 100),
        Err(SpiCardError::BufferSize {
            expected: 1024,
            actual: 512
        })
    ));
}

#[test]
fn stalled_read_times_out() {
    let (sim, mut card) = attach(CardSim::v2(1));
    card.init().unwrap();
    sim.borrow_mut().stall_reads = true;

    let mut buf = [0u8; SD_SECTOR_SIZE];
    assert!(matches!(
        card.read_blocks(0, &mut buf, 1, 1),
        Err(SpiCardError::DataTokenTimeout(17))
    ));
}

#[test]
fn read_timeout_covers_the_whole_transfer() {
    let (sim, mut card) = attach(CardSim::v2(1));
    card.init().unwrap();
    sim.borrow_mut().token_delay = 80;

    // 1 ms buys 100 waits; one block needs 82 of them.
    let mut one = [0u8; SD_SECTOR_SIZE];
    card.read_blocks(0, &mut one, 1, 1).unwrap();

    let mut eight = vec![0u8; 8 * SD_SECTOR_SIZE];
    assert!(matches!(
        card.read_blocks(0, &mut eight, 8, 1),
        Err(SpiCardError::DataTokenTimeout(17))
    ));
    assert!(!sim.borrow().selected);
}

#[cfg(feature = "write")]
#[test]
fn write_busy_wait_shares_the_transfer_timeout() {
    let (sim, mut card) = attach(CardSim::v2(1));
    card.init().unwrap();
    sim.borrow_mut().write_busy = 60;

    let one = [0xA5u8; SD_SECTOR_SIZE];
    card.write_blocks(0, &one, 1, 1).unwrap();

    let two = [0xA5u8; 2 * SD_SECTOR_SIZE];
    assert!(matches!(
        card.write_blocks(0, &two, 2, 1),
        Err(SpiCardError::WriteBusyTimeout)
    ));
}

#[test]
fn out_of_range_block_is_rejected_by_card() {
    let (_sim, mut card) = attach(CardSim::v2(1));
    card.init().unwrap();
    let mut buf = [0u8; SD_SECTOR_SIZE];
    assert!(matches!(
        card.read_blocks(1024, &mut buf, 1, 100),
        Err(SpiCardError::Cmd17Unexpected(0x20))
    ));
}

#[cfg(feature = "write")]
#[test]
fn multi_block_write_then_read_round_trips() {
    let (sim, mut card) = attach(CardSim::v2(1));
    card.init().unwrap();

    let data: Vec<u8> = (0..2 * SD_SECTOR_SIZE).map(|i| (i % 253) as u8).collect();
    card.write_blocks(10, &data, 2, 100).unwrap();
    assert!(sim.borrow().storage.contains_key(&10));
    assert!(sim.borrow().storage.contains_key(&11));

    let mut readback = vec![0u8; 2 * SD_SECTOR_SIZE];
    card.read_blocks(10, &mut readback, 2, 100).unwrap();
    assert_eq!(readback, data);
}

#[cfg(feature = "write")]
#[test]
fn standard_capacity_card_is_byte_addressed() {
    let (sim, mut card) = attach(CardSim::v1());
    card.init().unwrap();

    let data = [0x5Au8; SD_SECTOR_SIZE];
    card.write_blocks(3, &data, 1, 100).unwrap();
    let mut readback = [0u8; SD_SECTOR_SIZE];
    card.read_blocks(3, &mut readback, 1, 100).unwrap();

    assert_eq!(readback, data);
    let sim = sim.borrow();
    assert!(sim.commands.contains(&(24, 3 * 512)));
    assert!(sim.commands.contains(&(17, 3 * 512)));
}

#[test]
fn detect_pin_gates_init() {
    let shared = Rc::new(RefCell::new(CardSim::v2(1)));
    let mut card = SpiCard::with_detect(
        SimSpi(Rc::clone(&shared)),
        SimCs(Rc::clone(&shared)),
        NoDelay,
        DetectActiveLow(SimDetect(false)),
    );

    assert!(!card.is_present());
    assert!(matches!(card.init(), Err(SpiCardError::NotPresent)));
    assert!(shared.borrow().commands.is_empty());
}

#[cfg(feature = "write")]
#[test]
fn disk_adapter_runs_over_spi_card() {
    let (_sim, card) = attach(CardSim::v2(1));
    let mut disk = SdDisk::new(card);

    assert_eq!(disk.status(), StatusFlags::NOT_INITIALIZED);
    disk.initialize().unwrap();
    assert_eq!(disk.status(), StatusFlags::OK);

    let data = [0xC3u8; SD_SECTOR_SIZE];
    disk.write(&data, 1023, 1).unwrap();
    let mut readback = [0u8; SD_SECTOR_SIZE];
    disk.read(&mut readback, 1023, 1).unwrap();
    assert_eq!(readback, data);
}

#[test]
fn rate_control_switches_to_data_clock_after_identification() {
    let (sim, card) = attach(CardSim::v2(1));
    let mut card = card.with_rate_control(|spi: &mut SimSpi, hz| spi.0.borrow_mut().rates.push(hz));
    card.init().unwrap();

    assert_eq!(sim.borrow().rates, vec![400_000, 24_000_000]);
}

/// Bus that fails every exchange while chip select is low.
struct FaultyBus(Rc<Cell<bool>>);

impl FaultyBus {
    fn check(&self) -> Result<(), ErrorKind> {
        if self.0.get() {
            Err(ErrorKind::Other)
        } else {
            Ok(())
        }
    }
}

impl SpiErrorType for FaultyBus {
    type Error = ErrorKind;
}

impl SpiBus<u8> for FaultyBus {
    fn read(&mut self, _words: &mut [u8]) -> Result<(), Self::Error> {
        self.check()
    }

    fn write(&mut self, _words: &[u8]) -> Result<(), Self::Error> {
        Ok(())
    }

    fn transfer(&mut self, _read: &mut [u8], _write: &[u8]) -> Result<(), Self::Error> {
        self.check()
    }

    fn transfer_in_place(&mut self, _words: &mut [u8]) -> Result<(), Self::Error> {
        self.check()
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

struct TrackedCs(Rc<Cell<bool>>);

impl PinErrorType for TrackedCs {
    type Error = Infallible;
}

impl OutputPin for TrackedCs {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.set(true);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.0.set(false);
        Ok(())
    }
}

#[test]
fn bus_error_during_response_releases_chip_select() {
    let selected = Rc::new(Cell::new(false));
    let mut card = SpiCard::new(
        FaultyBus(Rc::clone(&selected)),
        TrackedCs(Rc::clone(&selected)),
        NoDelay,
    );

    assert!(matches!(
        card.init(),
        Err(SpiCardError::Spi(ErrorKind::Other))
    ));
    assert!(!selected.get());
    assert!(!card.is_initialized());
}
