//! Parameter persistence over non-volatile storage.
//!
//! Two NVM blocks are used in rotation: every save erases and rewrites the
//! block that is *not* currently active, so a power cut mid-write leaves the
//! previous block intact. On load, the valid block with the newest sequence
//! number wins; a corrupt or absent block simply falls back to the other
//! one, and if neither validates the device starts uncalibrated.

use super::block::{
    hash_param_name, BlockHeader, Entry, EntryFlags, MAX_ENTRIES_PER_BLOCK,
};
use super::storage::{ParamValue, ParameterStore, MAX_PARAMS, PARAM_NAME_LEN};
use crate::traits::{NvmError, NvmStorage};
use crc::{Crc, CRC_32_ISO_HDLC};
use heapless::String;
use heapless::Vec;

/// NVM addresses of the two parameter blocks.
pub const PARAM_BLOCK_ADDRESSES: [u32; 2] = [0x0000, 0x1000];

/// Size of the CRC32 trailer
const CRC_SIZE: usize = 4;

/// Largest possible serialized block
const MAX_BLOCK_LEN: usize = BlockHeader::SIZE + MAX_ENTRIES_PER_BLOCK * Entry::SIZE + CRC_SIZE;

/// CRC32 algorithm shared by save and load (ISO HDLC / Ethernet / ZIP)
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

fn value_to_entry(name: &str, value: &ParamValue) -> Entry {
    let (value_bits, flags) = match value {
        ParamValue::Bool(v) => (*v as u32, EntryFlags::TYPE_BOOL),
        ParamValue::Int(v) => (*v as u32, EntryFlags::TYPE_I32),
        ParamValue::Uint(v) => (*v, EntryFlags::TYPE_U32),
        ParamValue::Float(v) => (v.to_bits(), EntryFlags::TYPE_F32),
    };
    Entry {
        name_hash: hash_param_name(name),
        value_bits,
        flags,
    }
}

fn entry_to_value(entry: &Entry) -> Option<ParamValue> {
    if entry.flags.contains(EntryFlags::TYPE_F32) {
        Some(ParamValue::Float(f32::from_bits(entry.value_bits)))
    } else if entry.flags.contains(EntryFlags::TYPE_U32) {
        Some(ParamValue::Uint(entry.value_bits))
    } else if entry.flags.contains(EntryFlags::TYPE_I32) {
        Some(ParamValue::Int(entry.value_bits as i32))
    } else if entry.flags.contains(EntryFlags::TYPE_BOOL) {
        Some(ParamValue::Bool(entry.value_bits != 0))
    } else {
        None
    }
}

/// True if sequence `a` is newer than `b` under wrapping arithmetic.
fn sequence_newer(a: u16, b: u16) -> bool {
    a.wrapping_sub(b) as i16 > 0
}

/// Read and validate one block. Returns `None` for anything that does not
/// parse and checksum cleanly.
fn read_block<N: NvmStorage>(
    nvm: &mut N,
    address: u32,
) -> Option<(BlockHeader, Vec<Entry, MAX_ENTRIES_PER_BLOCK>)> {
    let mut header_bytes = [0u8; BlockHeader::SIZE];
    nvm.read(address, &mut header_bytes).ok()?;
    let header = BlockHeader::from_bytes(&header_bytes)?;
    if !header.is_valid() {
        return None;
    }

    let mut crc_data: Vec<u8, MAX_BLOCK_LEN> = Vec::new();
    crc_data.extend_from_slice(&header_bytes).ok()?;

    let mut entries: Vec<Entry, MAX_ENTRIES_PER_BLOCK> = Vec::new();
    let mut offset = address + BlockHeader::SIZE as u32;
    for _ in 0..header.entry_count {
        let mut entry_bytes = [0u8; Entry::SIZE];
        nvm.read(offset, &mut entry_bytes).ok()?;
        crc_data.extend_from_slice(&entry_bytes).ok()?;
        entries.push(Entry::from_bytes(&entry_bytes)?).ok()?;
        offset += Entry::SIZE as u32;
    }

    let mut crc_bytes = [0u8; CRC_SIZE];
    nvm.read(offset, &mut crc_bytes).ok()?;
    let stored_crc = u32::from_le_bytes(crc_bytes);
    if CRC32.checksum(&crc_data) != stored_crc {
        return None;
    }

    Some((header, entries))
}

/// Locate the newest valid block, if any. Returns `(block_index, sequence)`.
fn newest_block<N: NvmStorage>(nvm: &mut N) -> Option<(usize, u16)> {
    let mut best: Option<(usize, u16)> = None;
    for (index, address) in PARAM_BLOCK_ADDRESSES.iter().enumerate() {
        if let Some((header, _)) = read_block(nvm, *address) {
            match best {
                Some((_, seq)) if !sequence_newer(header.sequence, seq) => {}
                _ => best = Some((index, header.sequence)),
            }
        }
    }
    best
}

/// Persist the store to NVM.
///
/// Writes to the inactive block with an incremented sequence number and
/// clears the store's dirty flag on success.
pub fn save_params<N: NvmStorage>(
    store: &mut ParameterStore,
    nvm: &mut N,
) -> Result<(), NvmError> {
    let (target_index, sequence) = match newest_block(nvm) {
        Some((active, seq)) => ((active + 1) % PARAM_BLOCK_ADDRESSES.len(), seq.wrapping_add(1)),
        None => (0, 1),
    };
    let address = PARAM_BLOCK_ADDRESSES[target_index];

    let header = BlockHeader::new(sequence, store.len() as u16);
    let mut crc_data: Vec<u8, MAX_BLOCK_LEN> = Vec::new();
    crc_data
        .extend_from_slice(&header.to_bytes())
        .map_err(|_| NvmError::WriteFailed)?;
    for (name, value) in store.iter_all() {
        let entry = value_to_entry(name.as_str(), value);
        crc_data
            .extend_from_slice(&entry.to_bytes())
            .map_err(|_| NvmError::WriteFailed)?;
    }
    let crc = CRC32.checksum(&crc_data);

    nvm.erase(address, nvm.block_size())?;
    nvm.write(address, &crc_data)?;
    nvm.write(address + crc_data.len() as u32, &crc.to_le_bytes())?;

    store.clear_dirty();
    Ok(())
}

/// Restore parameter values from the newest valid NVM block.
///
/// Only parameters already registered in `store` are restored; stored
/// entries whose name hash matches no registered parameter are ignored, as
/// are entries whose type no longer matches. Returns `true` if a valid
/// block was found and applied.
pub fn load_params<N: NvmStorage>(store: &mut ParameterStore, nvm: &mut N) -> bool {
    let (index, _) = match newest_block(nvm) {
        Some(found) => found,
        None => return false,
    };
    let (_, entries) = match read_block(nvm, PARAM_BLOCK_ADDRESSES[index]) {
        Some(block) => block,
        None => return false,
    };

    let mut restored: Vec<(String<PARAM_NAME_LEN>, ParamValue), MAX_PARAMS> = Vec::new();
    for entry in &entries {
        let value = match entry_to_value(entry) {
            Some(value) => value,
            None => continue,
        };
        for (name, current) in store.iter_all() {
            let type_matches = core::mem::discriminant(current) == core::mem::discriminant(&value);
            if type_matches && hash_param_name(name.as_str()) == entry.name_hash {
                restored.push((name.clone(), value)).ok();
                break;
            }
        }
    }

    for (name, value) in restored {
        store.insert_raw(name, value);
    }
    store.clear_dirty();
    true
}
