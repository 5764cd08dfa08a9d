use crate::error::{ModelError, Result};

/// Key/value cache for one sequence.
///
/// Per layer, `k[layer]` and `v[layer]` are flat `[n_ctx, kv_dim]` arrays.
/// Only rows `0..len` hold committed state. The forward pass writes rows at
/// and beyond `len` while it runs and commits them by advancing `len` once
/// the whole batch succeeded, so a failed pass leaves the committed prefix
/// untouched.
#[derive(Debug)]
pub struct KvCache {
    k: Vec<Vec<f32>>,
    v: Vec<Vec<f32>>,
    kv_dim: usize,
    n_ctx: usize,
    len: usize,
}

impl KvCache {
    /// Allocate a zeroed cache, reporting allocation failure instead of
    /// aborting.
    pub fn new(n_layers: usize, kv_dim: usize, n_ctx: usize) -> Result<Self> {
        let per_layer = kv_dim
            .checked_mul(n_ctx)
            .ok_or(ModelError::CacheAlloc { bytes: usize::MAX })?;
        let bytes = Self::bytes_for(n_layers, kv_dim, n_ctx).unwrap_or(usize::MAX);

        let alloc = || -> Result<Vec<f32>> {
            let mut buf = Vec::new();
            buf.try_reserve_exact(per_layer)
                .map_err(|_| ModelError::CacheAlloc { bytes })?;
            buf.resize(per_layer, 0.0);
            Ok(buf)
        };
        let mut k = Vec::with_capacity(n_layers);
        let mut v = Vec::with_capacity(n_layers);
        for _ in 0..n_layers {
            k.push(alloc()?);
            v.push(alloc()?);
        }

        Ok(KvCache {
            k,
            v,
            kv_dim,
            n_ctx,
            len: 0,
        })
    }

    /// Total bytes for a cache of this shape, `None` on overflow.
    pub fn bytes_for(n_layers: usize, kv_dim: usize, n_ctx: usize) -> Option<usize> {
        n_layers
            .checked_mul(2)?
            .checked_mul(kv_dim)?
            .checked_mul(n_ctx)?
            .checked_mul(std::mem::size_of::<f32>())
    }

    /// Committed positions.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.n_ctx
    }

    pub fn n_layers(&self) -> usize {
        self.k.len()
    }

    pub fn kv_dim(&self) -> usize {
        self.kv_dim
    }

    /// Write one row of keys and values at `pos` without committing it.
    pub fn write(&mut self, layer: usize, pos: usize, k_row: &[f32], v_row: &[f32]) -> Result<()> {
        if pos >= self.n_ctx {
            return Err(ModelError::CacheOverflow {
                requested: pos + 1,
                capacity: self.n_ctx,
            });
        }
        if k_row.len() != self.kv_dim || v_row.len() != self.kv_dim {
            return Err(ModelError::Other(format!(
                "cache row width {}/{} does not match kv_dim {}",
                k_row.len(),
                v_row.len(),
                self.kv_dim
            )));
        }
        let off = pos * self.kv_dim;
        self.k[layer][off..off + self.kv_dim].copy_from_slice(k_row);
        self.v[layer][off..off + self.kv_dim].copy_from_slice(v_row);
        Ok(())
    }

    /// Keys for positions `0..n_pos` of `layer`.
    pub fn keys(&self, layer: usize, n_pos: usize) -> &[f32] {
        &self.k[layer][..n_pos * self.kv_dim]
    }

    /// Values for positions `0..n_pos` of `layer`.
    pub fn values(&self, layer: usize, n_pos: usize) -> &[f32] {
        &self.v[layer][..n_pos * self.kv_dim]
    }

    /// Advance the committed length.
    pub fn commit(&mut self, new_len: usize) -> Result<()> {
        if new_len > self.n_ctx {
            return Err(ModelError::CacheOverflow {
                requested: new_len,
                capacity: self.n_ctx,
            });
        }
        self.len = new_len;
        Ok(())
    }

    /// Forget every committed position. The buffers are kept; stale rows
    /// are overwritten before they are read again.
    pub fn clear(&mut self) {
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_does_not_commit() {
        let mut cache = KvCache::new(2, 4, 8).unwrap();
        cache.write(1, 0, &[1.0; 4], &[2.0; 4]).unwrap();
        assert_eq!(cache.len(), 0);
        cache.commit(1).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.keys(1, 1), &[1.0; 4]);
        assert_eq!(cache.values(1, 1), &[2.0; 4]);
    }

    #[test]
    fn test_overflow_rejected() {
        let mut cache = KvCache::new(1, 2, 3).unwrap();
        assert!(matches!(
            cache.write(0, 3, &[0.0; 2], &[0.0; 2]),
            Err(ModelError::CacheOverflow { requested: 4, capacity: 3 })
        ));
        assert!(cache.commit(4).is_err());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut cache = KvCache::new(1, 2, 3).unwrap();
        cache.commit(3).unwrap();
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 3);
    }

    #[test]
    fn test_byte_size_overflow() {
        assert_eq!(KvCache::bytes_for(2, 4, 8), Some(2 * 2 * 4 * 8 * 4));
        assert_eq!(KvCache::bytes_for(usize::MAX, 2, 2), None);
        assert!(matches!(
            KvCache::new(1, usize::MAX, 2),
            Err(ModelError::CacheAlloc { .. })
        ));
    }
}
