/// The mutation stage driver.
///
/// A `Mutation` is configured with the current leader item and the two
/// dictionaries, then the campaign driver sequences its stages. Every stage
/// derives candidate inputs from the seed and submits each one through the
/// caller-provided [`SaveInput`] capability; the mutator itself holds no
/// global state.
use libafl::prelude::{HasMetadata, Rand, SerdeAnyMap, StdRand};
use libafl::state::{HasMaxSize, HasRand, State};
use serde::{Deserialize, Serialize};

use crate::abi::AbiCodec;
use crate::input::FuzzItem;
use crate::mutation_utils::{
    byte_mutator, byte_mutator_with_expansion, Dicts, DictWordsMetadata,
};
use crate::r#const::{
    ARITH_MAX, HAVOC_ROUNDS, INTERESTING_16, INTERESTING_32, INTERESTING_8, STAGE_COUNT,
};

/// Capability handed to every stage: consume one candidate input, return
/// the evaluated item. The campaign loop passes a stateful implementation
/// that mutably borrows the session.
pub trait SaveInput {
    fn save(&mut self, data: Vec<u8>) -> FuzzItem;
}

/// Mutation stages in display order. The values index
/// `FuzzStat::stage_finds` and `Mutation::stage_cycles`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum MutationStage {
    Flip1 = 0,
    Flip2,
    Flip4,
    Flip8,
    Flip16,
    Flip32,
    Arith8,
    Arith16,
    Arith32,
    Interest8,
    Interest16,
    Interest32,
    ExtrasUo,
    ExtrasAo,
    Havoc,
    Splice,
    Prolongation,
}

/// Mutator-local state: RNG, size cap and metadata for the hinted havoc
/// mutators. Kept separate from the session so stages can run while the
/// save callback mutably borrows the session.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MutatorState {
    rand_generator: StdRand,
    max_size: usize,
    metadata: SerdeAnyMap,
}

impl MutatorState {
    pub fn new(seed: u64, max_size: usize, code_words: Vec<Vec<u8>>) -> Self {
        let mut metadata = SerdeAnyMap::new();
        metadata.insert(DictWordsMetadata { words: code_words });
        Self {
            rand_generator: StdRand::with_seed(seed),
            max_size,
            metadata,
        }
    }
}

impl State for MutatorState {}

impl HasRand for MutatorState {
    type Rand = StdRand;

    fn rand(&self) -> &Self::Rand {
        &self.rand_generator
    }

    fn rand_mut(&mut self) -> &mut Self::Rand {
        &mut self.rand_generator
    }
}

impl HasMaxSize for MutatorState {
    fn max_size(&self) -> usize {
        self.max_size
    }

    fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
    }
}

impl HasMetadata for MutatorState {
    fn metadata(&self) -> &SerdeAnyMap {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut SerdeAnyMap {
        &mut self.metadata
    }
}

fn flip_bit(data: &mut [u8], pos: usize) {
    data[pos >> 3] ^= 128 >> (pos & 7);
}

/// One round of mutations over a single seed item.
pub struct Mutation<'a> {
    cur: FuzzItem,
    dicts: &'a Dicts,
    /// When set, havoc keeps the input length fixed.
    size_preserving: bool,
    pub stage_name: &'static str,
    pub stage_cur: usize,
    pub stage_max: usize,
    /// Candidates emitted per stage over the lifetime of this round.
    pub stage_cycles: [u64; STAGE_COUNT],
    state: MutatorState,
}

impl<'a> Mutation<'a> {
    pub fn new(
        cur: FuzzItem,
        dicts: &'a Dicts,
        size_preserving: bool,
        seed: u64,
        max_size: usize,
    ) -> Self {
        let state = MutatorState::new(seed, max_size, dicts.code.words.clone());
        Self {
            cur,
            dicts,
            size_preserving,
            stage_name: "init",
            stage_cur: 0,
            stage_max: 0,
            stage_cycles: [0; STAGE_COUNT],
            state,
        }
    }

    /// The seed this round mutates. Splice replaces it in place.
    pub fn current(&self) -> &FuzzItem {
        &self.cur
    }

    fn begin_stage(&mut self, name: &'static str, max: usize, stage: MutationStage) {
        self.stage_name = name;
        self.stage_cur = 0;
        self.stage_max = max;
        self.stage_cycles[stage as usize] += max as u64;
    }

    fn tick(&mut self) {
        self.stage_cur += 1;
    }

    fn rand_below(&mut self, n: u64) -> u64 {
        self.state.rand_mut().below(n)
    }

    /// Flip every bit once.
    pub fn single_walking_bit<S: SaveInput>(&mut self, save: &mut S) {
        let bits = self.cur.data.len() * 8;
        self.begin_stage("bitflip 1/1", bits, MutationStage::Flip1);
        let mut data = self.cur.data.clone();
        for pos in 0..bits {
            flip_bit(&mut data, pos);
            save.save(data.clone());
            flip_bit(&mut data, pos);
            self.tick();
        }
    }

    /// Flip every pair of adjacent bits.
    pub fn two_walking_bit<S: SaveInput>(&mut self, save: &mut S) {
        let bits = (self.cur.data.len() * 8).saturating_sub(1);
        self.begin_stage("bitflip 2/1", bits, MutationStage::Flip2);
        let mut data = self.cur.data.clone();
        for pos in 0..bits {
            flip_bit(&mut data, pos);
            flip_bit(&mut data, pos + 1);
            save.save(data.clone());
            flip_bit(&mut data, pos);
            flip_bit(&mut data, pos + 1);
            self.tick();
        }
    }

    /// Flip every run of four adjacent bits.
    pub fn four_walking_bit<S: SaveInput>(&mut self, save: &mut S) {
        let bits = (self.cur.data.len() * 8).saturating_sub(3);
        self.begin_stage("bitflip 4/1", bits, MutationStage::Flip4);
        let mut data = self.cur.data.clone();
        for pos in 0..bits {
            for i in 0..4 {
                flip_bit(&mut data, pos + i);
            }
            save.save(data.clone());
            for i in 0..4 {
                flip_bit(&mut data, pos + i);
            }
            self.tick();
        }
    }

    /// Invert every byte once.
    pub fn single_walking_byte<S: SaveInput>(&mut self, save: &mut S) {
        let len = self.cur.data.len();
        self.begin_stage("bitflip 8/8", len, MutationStage::Flip8);
        let mut data = self.cur.data.clone();
        for pos in 0..len {
            data[pos] ^= 0xff;
            save.save(data.clone());
            data[pos] ^= 0xff;
            self.tick();
        }
    }

    /// Invert every pair of adjacent bytes.
    pub fn two_walking_byte<S: SaveInput>(&mut self, save: &mut S) {
        let len = self.cur.data.len().saturating_sub(1);
        self.begin_stage("bitflip 16/8", len, MutationStage::Flip16);
        let mut data = self.cur.data.clone();
        for pos in 0..len {
            data[pos] ^= 0xff;
            data[pos + 1] ^= 0xff;
            save.save(data.clone());
            data[pos] ^= 0xff;
            data[pos + 1] ^= 0xff;
            self.tick();
        }
    }

    /// Invert every run of four adjacent bytes.
    pub fn four_walking_byte<S: SaveInput>(&mut self, save: &mut S) {
        let len = self.cur.data.len().saturating_sub(3);
        self.begin_stage("bitflip 32/8", len, MutationStage::Flip32);
        let mut data = self.cur.data.clone();
        for pos in 0..len {
            for i in 0..4 {
                data[pos + i] ^= 0xff;
            }
            save.save(data.clone());
            for i in 0..4 {
                data[pos + i] ^= 0xff;
            }
            self.tick();
        }
    }

    /// Add and subtract small constants from every byte.
    pub fn single_arith<S: SaveInput>(&mut self, save: &mut S) {
        let len = self.cur.data.len();
        self.begin_stage("arith 8/8", len * ARITH_MAX as usize * 2, MutationStage::Arith8);
        let mut data = self.cur.data.clone();
        for pos in 0..len {
            let orig = data[pos];
            for j in 1..=ARITH_MAX as u8 {
                data[pos] = orig.wrapping_add(j);
                save.save(data.clone());
                self.tick();
                data[pos] = orig.wrapping_sub(j);
                save.save(data.clone());
                self.tick();
            }
            data[pos] = orig;
        }
    }

    /// Add and subtract small constants from every 16-bit word, both
    /// endiannesses.
    pub fn two_arith<S: SaveInput>(&mut self, save: &mut S) {
        let len = self.cur.data.len().saturating_sub(1);
        self.begin_stage("arith 16/8", len * ARITH_MAX as usize * 4, MutationStage::Arith16);
        let mut data = self.cur.data.clone();
        for pos in 0..len {
            let orig = [data[pos], data[pos + 1]];
            for j in 1..=ARITH_MAX as u16 {
                for value in [
                    u16::from_le_bytes(orig).wrapping_add(j).to_le_bytes(),
                    u16::from_le_bytes(orig).wrapping_sub(j).to_le_bytes(),
                    u16::from_be_bytes(orig).wrapping_add(j).to_be_bytes(),
                    u16::from_be_bytes(orig).wrapping_sub(j).to_be_bytes(),
                ] {
                    data[pos] = value[0];
                    data[pos + 1] = value[1];
                    save.save(data.clone());
                    self.tick();
                }
            }
            data[pos] = orig[0];
            data[pos + 1] = orig[1];
        }
    }

    /// Add and subtract small constants from every 32-bit word, both
    /// endiannesses.
    pub fn four_arith<S: SaveInput>(&mut self, save: &mut S) {
        let len = self.cur.data.len().saturating_sub(3);
        self.begin_stage("arith 32/8", len * ARITH_MAX as usize * 4, MutationStage::Arith32);
        let mut data = self.cur.data.clone();
        for pos in 0..len {
            let orig = [data[pos], data[pos + 1], data[pos + 2], data[pos + 3]];
            for j in 1..=ARITH_MAX as u32 {
                for value in [
                    u32::from_le_bytes(orig).wrapping_add(j).to_le_bytes(),
                    u32::from_le_bytes(orig).wrapping_sub(j).to_le_bytes(),
                    u32::from_be_bytes(orig).wrapping_add(j).to_be_bytes(),
                    u32::from_be_bytes(orig).wrapping_sub(j).to_be_bytes(),
                ] {
                    data[pos..pos + 4].copy_from_slice(&value);
                    save.save(data.clone());
                    self.tick();
                }
            }
            data[pos..pos + 4].copy_from_slice(&orig);
        }
    }

    /// Overwrite every byte with the known interesting 8-bit values.
    pub fn single_interest<S: SaveInput>(&mut self, save: &mut S) {
        let len = self.cur.data.len();
        self.begin_stage(
            "interest 8/8",
            len * INTERESTING_8.len(),
            MutationStage::Interest8,
        );
        let mut data = self.cur.data.clone();
        for pos in 0..len {
            let orig = data[pos];
            for value in INTERESTING_8 {
                data[pos] = value as u8;
                save.save(data.clone());
                self.tick();
            }
            data[pos] = orig;
        }
    }

    /// Overwrite every 16-bit word with the known interesting values, both
    /// endiannesses.
    pub fn two_interest<S: SaveInput>(&mut self, save: &mut S) {
        let len = self.cur.data.len().saturating_sub(1);
        self.begin_stage(
            "interest 16/8",
            len * INTERESTING_16.len() * 2,
            MutationStage::Interest16,
        );
        let mut data = self.cur.data.clone();
        for pos in 0..len {
            let orig = [data[pos], data[pos + 1]];
            for value in INTERESTING_16 {
                for encoded in [(value as u16).to_le_bytes(), (value as u16).to_be_bytes()] {
                    data[pos] = encoded[0];
                    data[pos + 1] = encoded[1];
                    save.save(data.clone());
                    self.tick();
                }
            }
            data[pos] = orig[0];
            data[pos + 1] = orig[1];
        }
    }

    /// Overwrite every 32-bit word with the known interesting values, both
    /// endiannesses.
    pub fn four_interest<S: SaveInput>(&mut self, save: &mut S) {
        let len = self.cur.data.len().saturating_sub(3);
        self.begin_stage(
            "interest 32/8",
            len * INTERESTING_32.len() * 2,
            MutationStage::Interest32,
        );
        let mut data = self.cur.data.clone();
        for pos in 0..len {
            let orig = [data[pos], data[pos + 1], data[pos + 2], data[pos + 3]];
            for value in INTERESTING_32 {
                for encoded in [(value as u32).to_le_bytes(), (value as u32).to_be_bytes()] {
                    data[pos..pos + 4].copy_from_slice(&encoded);
                    save.save(data.clone());
                    self.tick();
                }
            }
            data[pos..pos + 4].copy_from_slice(&orig);
        }
    }

    /// Overwrite every position with every collected address.
    pub fn overwrite_with_address_dictionary<S: SaveInput>(&mut self, save: &mut S) {
        let len = self.cur.data.len();
        let max: usize = self
            .dicts
            .address
            .words
            .iter()
            .map(|w| (len + 1).saturating_sub(w.len()))
            .sum();
        self.begin_stage("dictionary (address)", max, MutationStage::ExtrasAo);
        let words = self.dicts.address.words.clone();
        let mut data = self.cur.data.clone();
        for word in &words {
            if word.len() > len {
                continue;
            }
            for pos in 0..=len - word.len() {
                let orig = data[pos..pos + word.len()].to_vec();
                data[pos..pos + word.len()].copy_from_slice(word);
                save.save(data.clone());
                data[pos..pos + word.len()].copy_from_slice(&orig);
                self.tick();
            }
        }
    }

    /// Stacked random mutations over fresh copies of the seed.
    pub fn havoc<S: SaveInput>(&mut self, save: &mut S) {
        self.begin_stage("havoc", HAVOC_ROUNDS, MutationStage::Havoc);
        for _ in 0..HAVOC_ROUNDS {
            let mut item = FuzzItem::new(self.cur.data.clone());
            let result = if self.size_preserving {
                byte_mutator(&mut self.state, &mut item)
            } else {
                byte_mutator_with_expansion(&mut self.state, &mut item)
            };
            if result == libafl::mutators::MutationResult::Mutated {
                save.save(item.data);
            }
            self.tick();
        }
    }

    /// Replace the seed with a crossover of itself and another corpus item.
    /// Returns false when no partner with a usable diff region exists; on
    /// success the caller is expected to run havoc on the spliced seed.
    pub fn splice(&mut self, items: &[FuzzItem]) -> bool {
        if self.cur.data.len() < 2 {
            return false;
        }
        let candidates: Vec<&FuzzItem> = items
            .iter()
            .filter(|item| item.data.len() > 2 && item.data != self.cur.data)
            .collect();
        if candidates.is_empty() {
            return false;
        }

        let partner = candidates[self.rand_below(candidates.len() as u64) as usize];
        let common = self.cur.data.len().min(partner.data.len());
        let mut first_diff = None;
        let mut last_diff = 0;
        for i in 0..common {
            if self.cur.data[i] != partner.data[i] {
                if first_diff.is_none() {
                    first_diff = Some(i);
                }
                last_diff = i;
            }
        }
        let first_diff = match first_diff {
            Some(pos) if last_diff >= 2 && pos < last_diff => pos,
            _ => return false,
        };
        self.begin_stage("splice", 1, MutationStage::Splice);

        let split = first_diff + self.rand_below((last_diff - first_diff) as u64) as usize;
        let mut spliced = self.cur.data[..split].to_vec();
        spliced.extend_from_slice(&partner.data[split..]);
        self.cur.data = spliced;
        self.stage_cur = 1;
        true
    }

    /// Prolong every corpus item's sequence with the current seed, so paths
    /// gated on prior state get revisited. Returns whether any candidate
    /// was submitted.
    pub fn prolongate<A: AbiCodec, S: SaveInput>(
        &mut self,
        items: &[FuzzItem],
        abi: &A,
        save: &mut S,
    ) -> bool {
        let rounds = items.iter().filter(|item| !item.data.is_empty()).count();
        if rounds == 0 || self.cur.data.is_empty() {
            return false;
        }
        self.begin_stage("prolongation", rounds, MutationStage::Prolongation);
        for item in items.iter().filter(|item| !item.data.is_empty()) {
            let mut combined = item.data.clone();
            combined.extend_from_slice(&self.cur.data);
            save.save(abi.postprocess_testdata(&combined));
            self.tick();
        }
        true
    }
}
