/// Byte-level mutation helpers backing the havoc stage.
use libafl::inputs::{HasBytesVec, Input};
use libafl::mutators::MutationResult;
use libafl::prelude::{
    tuple_list, BitFlipMutator, ByteAddMutator, ByteDecMutator, ByteFlipMutator, ByteIncMutator,
    ByteInterestingMutator, ByteNegMutator, ByteRandMutator, BytesCopyMutator, BytesExpandMutator,
    BytesInsertMutator, BytesRandInsertMutator, BytesRandSetMutator, BytesSetMutator,
    BytesSwapMutator, DwordAddMutator, DwordInterestingMutator, HasMetadata, Mutator, Named,
    QwordAddMutator, Rand, StdScheduledMutator, WordAddMutator, WordInterestingMutator,
};
use libafl::state::{HasMaxSize, HasRand, State};
use libafl::{impl_serdeany, Error};
use serde::{Deserialize, Serialize};

/// Words harvested from contract code or collected addresses, consumed by
/// the dictionary stages. Construction happens outside the core.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Dictionary {
    pub words: Vec<Vec<u8>>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_word(&mut self, word: Vec<u8>) {
        if !word.is_empty() && !self.words.contains(&word) {
            self.words.push(word);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// The two dictionaries handed to the mutator.
#[derive(Clone, Debug, Default)]
pub struct Dicts {
    /// Constants harvested from the contract bytecode.
    pub code: Dictionary,
    /// Addresses collected while deploying the attacker agent.
    pub address: Dictionary,
}

/// Code-dictionary words attached to the mutator-local state so the
/// scheduled mutator can splice them in during havoc.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DictWordsMetadata {
    pub words: Vec<Vec<u8>>,
}

impl_serdeany!(DictWordsMetadata);

/// Overwrites a random position of the input with a random dictionary word.
///
/// Setting bytes directly to constants found in the code frequently clears
/// equality guards that random flips would never satisfy.
pub struct DictHintedMutator;

impl Named for DictHintedMutator {
    fn name(&self) -> &str {
        "DictHintedMutator"
    }
}

impl DictHintedMutator {
    pub fn new() -> Self {
        Self {}
    }
}

impl<I, S> Mutator<I, S> for DictHintedMutator
where
    S: State + HasRand + HasMetadata,
    I: Input + HasBytesVec,
{
    fn mutate(
        &mut self,
        state: &mut S,
        input: &mut I,
        _stage_idx: i32,
    ) -> Result<MutationResult, Error> {
        let word_idx = state.rand_mut().next() as usize;
        let word = match state.metadata().get::<DictWordsMetadata>() {
            Some(meta) if !meta.words.is_empty() => meta.words[word_idx % meta.words.len()].clone(),
            _ => return Ok(MutationResult::Skipped),
        };

        let bytes = input.bytes_mut();
        if bytes.is_empty() {
            return Ok(MutationResult::Skipped);
        }
        let pos = state.rand_mut().below(bytes.len() as u64) as usize;
        let end = usize::min(pos + word.len(), bytes.len());
        bytes[pos..end].copy_from_slice(&word[..end - pos]);
        Ok(MutationResult::Mutated)
    }
}

/// Mutates fixed-size input bytes with the stock byte mutators plus the
/// dictionary hint. The input length never changes.
pub fn byte_mutator<I, S>(state: &mut S, input: &mut I) -> MutationResult
where
    S: State + HasRand + HasMetadata,
    I: HasBytesVec + Input,
{
    let mutations = tuple_list!(
        BitFlipMutator::new(),
        ByteFlipMutator::new(),
        ByteIncMutator::new(),
        ByteDecMutator::new(),
        ByteNegMutator::new(),
        ByteRandMutator::new(),
        ByteAddMutator::new(),
        WordAddMutator::new(),
        DwordAddMutator::new(),
        QwordAddMutator::new(),
        ByteInterestingMutator::new(),
        WordInterestingMutator::new(),
        DwordInterestingMutator::new(),
        BytesSetMutator::new(),
        BytesRandSetMutator::new(),
        BytesSwapMutator::new(),
        DictHintedMutator::new(),
    );

    let mut mutator = StdScheduledMutator::new(mutations);
    mutator.mutate(state, input, 0).unwrap()
}

/// Mutates variable-size input bytes: everything `byte_mutator` does plus
/// growing and copying mutations, bounded by the state's max size.
pub fn byte_mutator_with_expansion<I, S>(state: &mut S, input: &mut I) -> MutationResult
where
    S: State + HasRand + HasMetadata + HasMaxSize,
    I: HasBytesVec + Input,
{
    let mutations = tuple_list!(
        BitFlipMutator::new(),
        ByteFlipMutator::new(),
        ByteIncMutator::new(),
        ByteDecMutator::new(),
        ByteNegMutator::new(),
        ByteRandMutator::new(),
        ByteAddMutator::new(),
        WordAddMutator::new(),
        DwordAddMutator::new(),
        QwordAddMutator::new(),
        ByteInterestingMutator::new(),
        WordInterestingMutator::new(),
        DwordInterestingMutator::new(),
        BytesExpandMutator::new(),
        BytesInsertMutator::new(),
        BytesRandInsertMutator::new(),
        BytesSetMutator::new(),
        BytesRandSetMutator::new(),
        BytesCopyMutator::new(),
        BytesSwapMutator::new(),
        DictHintedMutator::new(),
    );

    let mut mutator = StdScheduledMutator::new(mutations);
    mutator.mutate(state, input, 0).unwrap()
}
