//! Compiled-shader cache.
//!
//! Every effect owns one [`ShaderCache`]. It memoizes two levels:
//!
//! - stages, keyed by a content hash of (source, macros, entry point,
//!   profile, stage), so identical permutations compile once;
//! - linked programs, keyed by the stage keys of a pass, so passes that
//!   generate byte-identical stages share one program and its reflection.
//!
//! Lookups take a read lock; inserts take a write lock. Stage entries can be
//! exported to and imported from RON snapshots.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::backend::GpuProgram;
use crate::error::GraphicsError;
use crate::types::{PerStage, ShaderStage};

use super::compiler::{CompileRequest, CompiledStage};
use super::reflection::{ReflectedVariable, StageReflection};

/// Content hash identifying one stage compile.
///
/// A blake3 digest over a versioned, length-prefixed encoding of the
/// request, so keys stay stable across toolchains and can be persisted.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageKey(pub [u8; 32]);

impl StageKey {
    const VERSION: &'static [u8] = b"klayge shader stage key v1";

    /// Hash everything that affects the compiled output of `request`.
    pub fn of(request: &CompileRequest<'_>) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(Self::VERSION);
        hasher.update(&[request.stage.index() as u8]);
        update_str(&mut hasher, request.source);
        update_str(&mut hasher, request.entry_point);
        update_str(&mut hasher, request.profile);
        hasher.update(&(request.macros.len() as u64).to_le_bytes());
        for (name, value) in request.macros {
            update_str(&mut hasher, name);
            update_str(&mut hasher, value);
        }
        Self(*hasher.finalize().as_bytes())
    }
}

fn update_str(hasher: &mut blake3::Hasher, text: &str) {
    hasher.update(&(text.len() as u64).to_le_bytes());
    hasher.update(text.as_bytes());
}

impl fmt::Debug for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StageKey(")?;
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

/// Stage keys of every stage of a pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramKey(pub PerStageKeys);

/// Per-stage optional keys.
pub type PerStageKeys = [Option<StageKey>; ShaderStage::COUNT];

/// A compiled stage with its reflection.
#[derive(Debug, Clone)]
pub struct CachedStage {
    pub compiled: Arc<CompiledStage>,
    pub reflection: Arc<StageReflection>,
}

/// Constant buffer of a linked program, merged across stages by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramCBuffer {
    pub name: String,
    pub size: u32,
}

/// A linked program: compiled stages, their reflection, the backend program
/// and the merged constant-buffer layout. Immutable once built.
#[derive(Debug)]
pub struct LinkedProgram {
    stages: PerStage<Option<CachedStage>>,
    program: GpuProgram,
    cbuffers: Vec<ProgramCBuffer>,
    /// Per stage: native cbuffer slot -> index into `cbuffers`.
    stage_cbuffers: PerStage<Vec<Option<usize>>>,
}

impl LinkedProgram {
    /// Merge per-stage reflection into one program layout.
    ///
    /// Buffers with the same name in several stages become one buffer;
    /// they must agree on size and member layout.
    pub fn new(
        stages: PerStage<Option<CachedStage>>,
        program: GpuProgram,
    ) -> Result<Self, GraphicsError> {
        let mut cbuffers: Vec<ProgramCBuffer> = Vec::new();
        let mut layouts: Vec<&[ReflectedVariable]> = Vec::new();
        let mut stage_cbuffers: PerStage<Vec<Option<usize>>> = PerStage::default();

        for (stage, cached) in stages.iter() {
            let Some(cached) = cached else { continue };
            let reflection = &cached.reflection;
            let mut slots = vec![None; reflection.cbuffer_slot_count()];
            for cb in &reflection.constant_buffers {
                let index = match cbuffers.iter().position(|b| b.name == cb.name) {
                    Some(index) if cbuffers[index].size != cb.size => {
                        return Err(GraphicsError::LinkFailed(format!(
                            "constant buffer `{}` is {} bytes in {stage} but {} bytes elsewhere",
                            cb.name, cb.size, cbuffers[index].size
                        )));
                    }
                    Some(index) if !same_layout(layouts[index], &cb.variables) => {
                        return Err(GraphicsError::LinkFailed(format!(
                            "constant buffer `{}` has a different member layout in {stage}",
                            cb.name
                        )));
                    }
                    Some(index) => index,
                    None => {
                        cbuffers.push(ProgramCBuffer {
                            name: cb.name.clone(),
                            size: cb.size,
                        });
                        layouts.push(&cb.variables);
                        cbuffers.len() - 1
                    }
                };
                slots[cb.slot as usize] = Some(index);
            }
            stage_cbuffers[stage] = slots;
        }

        Ok(Self {
            stages,
            program,
            cbuffers,
            stage_cbuffers,
        })
    }

    /// Compiled stage and reflection for `stage`, if present.
    pub fn stage(&self, stage: ShaderStage) -> Option<&CachedStage> {
        self.stages[stage].as_ref()
    }

    /// Stages present in the program, in pipeline order.
    pub fn stages(&self) -> impl Iterator<Item = (ShaderStage, &CachedStage)> {
        self.stages
            .iter()
            .filter_map(|(stage, cached)| cached.as_ref().map(|c| (stage, c)))
    }

    /// Backend program handle.
    pub fn program(&self) -> &GpuProgram {
        &self.program
    }

    /// Merged constant buffers.
    pub fn cbuffers(&self) -> &[ProgramCBuffer] {
        &self.cbuffers
    }

    /// Index of the merged buffer named `name`.
    pub fn cbuffer_index(&self, name: &str) -> Option<usize> {
        self.cbuffers.iter().position(|cb| cb.name == name)
    }

    /// Native slot table of `stage`: slot -> merged buffer index.
    pub fn stage_cbuffers(&self, stage: ShaderStage) -> &[Option<usize>] {
        &self.stage_cbuffers[stage]
    }
}

/// Member lists match ignoring which per-stage buffer index they carry.
fn same_layout(a: &[ReflectedVariable], b: &[ReflectedVariable]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.name == y.name
                && x.offset == y.offset
                && x.scalar == y.scalar
                && x.rows == y.rows
                && x.columns == y.columns
                && x.elements == y.elements
                && x.array_stride == y.array_stride
        })
}

/// One stage of a [`CacheSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: StageKey,
    pub stage: ShaderStage,
    pub entry_point: String,
    pub profile: String,
    pub code: String,
    pub reflection: StageReflection,
}

/// Serializable copy of the stage level of a cache.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub entries: Vec<SnapshotEntry>,
}

impl CacheSnapshot {
    /// Serialize to pretty RON.
    pub fn to_ron(&self) -> Result<String, GraphicsError> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| GraphicsError::Internal(e.to_string()))
    }

    /// Parse from RON.
    pub fn from_ron(text: &str) -> Result<Self, GraphicsError> {
        ron::from_str(text).map_err(|e| GraphicsError::EffectParse(e.to_string()))
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub stage_hits: u64,
    pub stage_misses: u64,
    pub program_hits: u64,
    pub program_misses: u64,
}

/// Stage and program memoization for one effect.
#[derive(Debug, Default)]
pub struct ShaderCache {
    stages: RwLock<HashMap<StageKey, CachedStage>>,
    programs: RwLock<HashMap<ProgramKey, Arc<LinkedProgram>>>,
    stage_hits: AtomicU64,
    stage_misses: AtomicU64,
    program_hits: AtomicU64,
    program_misses: AtomicU64,
}

impl ShaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a compiled stage.
    pub fn stage(&self, key: StageKey) -> Option<CachedStage> {
        let hit = self.stages.read().get(&key).cloned();
        let counter = if hit.is_some() {
            &self.stage_hits
        } else {
            &self.stage_misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        hit
    }

    /// Look up the stage compiled for `request`.
    ///
    /// An entry under `key` whose stage, entry point or profile differ from
    /// the request is dropped and counted as a miss.
    pub fn stage_for(&self, key: StageKey, request: &CompileRequest<'_>) -> Option<CachedStage> {
        let hit = self.stage(key)?;
        let compiled = &hit.compiled;
        if compiled.stage() == request.stage
            && compiled.entry_point() == request.entry_point
            && compiled.profile() == request.profile
        {
            return Some(hit);
        }
        log::warn!(
            "shader cache: entry {key:?} holds {} `{}` ({}), expected {} `{}` ({}); recompiling",
            compiled.stage(),
            compiled.entry_point(),
            compiled.profile(),
            request.stage,
            request.entry_point,
            request.profile
        );
        self.stages.write().remove(&key);
        self.stage_hits.fetch_sub(1, Ordering::Relaxed);
        self.stage_misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a compiled stage. An existing entry wins.
    pub fn insert_stage(&self, key: StageKey, stage: CachedStage) -> CachedStage {
        self.stages.write().entry(key).or_insert(stage).clone()
    }

    /// Look up a linked program.
    pub fn program(&self, key: &ProgramKey) -> Option<Arc<LinkedProgram>> {
        let hit = self.programs.read().get(key).cloned();
        let counter = if hit.is_some() {
            &self.program_hits
        } else {
            &self.program_misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        hit
    }

    /// Store a linked program. An existing entry wins.
    pub fn insert_program(&self, key: ProgramKey, program: Arc<LinkedProgram>) -> Arc<LinkedProgram> {
        self.programs.write().entry(key).or_insert(program).clone()
    }

    /// Number of cached stages.
    pub fn stage_count(&self) -> usize {
        self.stages.read().len()
    }

    /// Number of cached programs.
    pub fn program_count(&self) -> usize {
        self.programs.read().len()
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            stage_hits: self.stage_hits.load(Ordering::Relaxed),
            stage_misses: self.stage_misses.load(Ordering::Relaxed),
            program_hits: self.program_hits.load(Ordering::Relaxed),
            program_misses: self.program_misses.load(Ordering::Relaxed),
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.stages.write().clear();
        self.programs.write().clear();
    }

    /// Copy the stage level into a snapshot, ordered by key.
    pub fn export(&self) -> CacheSnapshot {
        let stages = self.stages.read();
        let mut entries: Vec<SnapshotEntry> = stages
            .iter()
            .map(|(key, cached)| SnapshotEntry {
                key: *key,
                stage: cached.compiled.stage(),
                entry_point: cached.compiled.entry_point().to_string(),
                profile: cached.compiled.profile().to_string(),
                code: cached.compiled.code().to_string(),
                reflection: (*cached.reflection).clone(),
            })
            .collect();
        entries.sort_by_key(|e| e.key);
        CacheSnapshot { entries }
    }

    /// Load snapshot entries as stage hits. Returns how many were added.
    pub fn import(&self, snapshot: &CacheSnapshot) -> Result<usize, GraphicsError> {
        let mut stages = self.stages.write();
        let mut added = 0;
        for entry in &snapshot.entries {
            if entry.reflection.stage != entry.stage {
                return Err(GraphicsError::ReflectionFailed(format!(
                    "snapshot entry `{}` is a {} stage with {} reflection",
                    entry.entry_point, entry.stage, entry.reflection.stage
                )));
            }
            entry.reflection.validate()?;
            if stages.contains_key(&entry.key) {
                continue;
            }
            let compiled = CompiledStage::new(
                entry.stage,
                entry.entry_point.as_str(),
                entry.profile.as_str(),
                entry.code.as_str(),
            );
            stages.insert(
                entry.key,
                CachedStage {
                    compiled: Arc::new(compiled),
                    reflection: Arc::new(entry.reflection.clone()),
                },
            );
            added += 1;
        }
        log::debug!("shader cache: imported {added} of {} stages", snapshot.entries.len());
        Ok(added)
    }
}

static_assertions::assert_impl_all!(ShaderCache: Send, Sync);
