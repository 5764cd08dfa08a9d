//! Flat C API over `dk-session`.
//!
//! Every handle is heap-allocated on the Rust side and freed by its matching
//! `*_free` function. Functions that can fail return a `DkStatus` (or, for
//! `dk_decode`, the decode status integer) and leave a message for
//! `dk_last_error` on the calling thread. Panics never cross the boundary.

mod error;
mod handles;
mod sampler;
mod types;

pub use handles::*;
pub use sampler::*;
pub use types::*;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::AssertUnwindSafe;
use std::ptr;

use dk_session::{
    backend, Batch, Context, ContextParams, Model, ModelParams, VocabError, MAX_CONTEXT_TOKENS,
};
use error::{report, set_last_error};

/// Run `f`, turning a panic into `fallback` plus a last-error message.
fn catch_panic<T>(fallback: T, f: impl FnOnce() -> T) -> T {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(v) => v,
        Err(_) => {
            set_last_error("internal panic");
            fallback
        }
    }
}

unsafe fn str_arg<'a>(p: *const c_char, what: &str) -> Result<&'a str, DkStatus> {
    if p.is_null() {
        set_last_error(format!("{what} is null"));
        return Err(DkStatus::ErrorInvalidArgument);
    }
    CStr::from_ptr(p).to_str().map_err(|e| {
        set_last_error(format!("{what} is not valid UTF-8: {e}"));
        DkStatus::ErrorInvalidArgument
    })
}

/// Copy `src` plus a trailing NUL into `buf`. The length without the NUL
/// is written to `n_out` on success; the length needed (NUL included) on
/// `ErrorBufferTooSmall`.
unsafe fn copy_c_string(src: &str, buf: *mut c_char, cap: usize, n_out: *mut i32) -> DkStatus {
    let needed = src.len() + 1;
    if buf.is_null() || cap < needed {
        write_len(n_out, needed);
        set_last_error(format!("buffer of {cap} bytes is too small; {needed} required"));
        return DkStatus::ErrorBufferTooSmall;
    }
    ptr::copy_nonoverlapping(src.as_ptr(), buf.cast::<u8>(), src.len());
    *buf.add(src.len()) = 0;
    write_len(n_out, src.len());
    DkStatus::Ok
}

unsafe fn write_len(n_out: *mut i32, n: usize) {
    if !n_out.is_null() {
        *n_out = i32::try_from(n).unwrap_or(i32::MAX);
    }
}

/// A mutable view of a caller buffer; empty when `cap` is 0 or `buf` null.
unsafe fn out_slice<'a, T>(buf: *mut T, cap: i32) -> &'a mut [T] {
    match usize::try_from(cap) {
        Ok(cap) if cap > 0 && !buf.is_null() => std::slice::from_raw_parts_mut(buf, cap),
        _ => &mut [],
    }
}

// backend

/// One-time global setup. Safe to call any number of times from any thread.
#[no_mangle]
pub extern "C" fn dk_backend_init() -> DkStatus {
    catch_panic(DkStatus::ErrorInternal, || {
        backend::init();
        DkStatus::Ok
    })
}

// model

#[no_mangle]
pub extern "C" fn dk_model_default_params() -> DkModelParams {
    ModelParams::default().into()
}

/// Load a GGUF model. On success `*model_out` receives a handle to free
/// with `dk_model_free`.
///
/// # Safety
/// `path` must be a NUL-terminated string and `model_out` a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn dk_model_load(
    path: *const c_char,
    params: DkModelParams,
    model_out: *mut *mut DkModel,
) -> DkStatus {
    catch_panic(DkStatus::ErrorInternal, || {
        if model_out.is_null() {
            set_last_error("model_out is null");
            return DkStatus::ErrorInvalidArgument;
        }
        let path = match str_arg(path, "path") {
            Ok(p) => p,
            Err(status) => return status,
        };
        match Model::load(path, params.into()) {
            Ok(model) => {
                *model_out = Box::into_raw(Box::new(DkModel { inner: model }));
                DkStatus::Ok
            }
            Err(e) => report(&e),
        }
    })
}

/// Free a model. Null is a no-op.
///
/// # Safety
/// `model` must come from `dk_model_load` and no context may still use it.
#[no_mangle]
pub unsafe extern "C" fn dk_model_free(model: *mut DkModel) {
    if !model.is_null() {
        drop(Box::from_raw(model));
    }
}

/// # Safety
/// `model` must be a live handle or null.
#[no_mangle]
pub unsafe extern "C" fn dk_model_n_vocab(model: *const DkModel) -> i32 {
    model.as_ref().map_or(0, |m| m.inner.n_vocab() as i32)
}

/// # Safety
/// `model` must be a live handle or null.
#[no_mangle]
pub unsafe extern "C" fn dk_model_n_embd(model: *const DkModel) -> i32 {
    model.as_ref().map_or(0, |m| m.inner.n_embd() as i32)
}

/// # Safety
/// `model` must be a live handle or null.
#[no_mangle]
pub unsafe extern "C" fn dk_model_n_layer(model: *const DkModel) -> i32 {
    model.as_ref().map_or(0, |m| m.inner.n_layer() as i32)
}

/// # Safety
/// `model` must be a live handle or null.
#[no_mangle]
pub unsafe extern "C" fn dk_model_n_ctx_train(model: *const DkModel) -> i32 {
    model.as_ref().map_or(0, |m| m.inner.n_ctx_train() as i32)
}

/// # Safety
/// `model` must be a live handle or null.
#[no_mangle]
pub unsafe extern "C" fn dk_model_n_params(model: *const DkModel) -> u64 {
    model.as_ref().map_or(0, |m| m.inner.n_params() as u64)
}

/// Write a NUL-terminated summary such as `llama 6.74B params` into `buf`.
///
/// # Safety
/// `buf` must be writable for `buf_len` bytes; `n_out` may be null.
#[no_mangle]
pub unsafe extern "C" fn dk_model_desc(
    model: *const DkModel,
    buf: *mut c_char,
    buf_len: usize,
    n_out: *mut i32,
) -> DkStatus {
    catch_panic(DkStatus::ErrorInternal, || {
        let Some(model) = model.as_ref() else {
            set_last_error("model is null");
            return DkStatus::ErrorInvalidArgument;
        };
        copy_c_string(&model.inner.desc(), buf, buf_len, n_out)
    })
}

/// Write the metadata value stored under `key` as text.
///
/// # Safety
/// As `dk_model_desc`; `key` must be NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn dk_model_meta_val_str(
    model: *const DkModel,
    key: *const c_char,
    buf: *mut c_char,
    buf_len: usize,
    n_out: *mut i32,
) -> DkStatus {
    catch_panic(DkStatus::ErrorInternal, || {
        let Some(model) = model.as_ref() else {
            set_last_error("model is null");
            return DkStatus::ErrorInvalidArgument;
        };
        let key = match str_arg(key, "key") {
            Ok(k) => k,
            Err(status) => return status,
        };
        match model.inner.meta_str(key) {
            Some(value) => copy_c_string(&value, buf, buf_len, n_out),
            None => {
                set_last_error(format!("no scalar metadata under {key}"));
                DkStatus::ErrorInvalidArgument
            }
        }
    })
}

// context

#[no_mangle]
pub extern "C" fn dk_context_default_params() -> DkContextParams {
    ContextParams::default().into()
}

/// Create a decode context over `model`.
///
/// # Safety
/// `model` must stay alive until the context is freed.
#[no_mangle]
pub unsafe extern "C" fn dk_context_create(
    model: *const DkModel,
    params: DkContextParams,
    ctx_out: *mut *mut DkContext,
) -> DkStatus {
    catch_panic(DkStatus::ErrorInternal, || {
        if ctx_out.is_null() {
            set_last_error("ctx_out is null");
            return DkStatus::ErrorInvalidArgument;
        }
        // The caller keeps the model alive for the context's lifetime.
        let Some(model): Option<&'static DkModel> = model.as_ref() else {
            set_last_error("model is null");
            return DkStatus::ErrorInvalidArgument;
        };
        match Context::new(&model.inner, params.into()) {
            Ok(ctx) => {
                *ctx_out = Box::into_raw(Box::new(DkContext { inner: ctx }));
                DkStatus::Ok
            }
            Err(e) => report(&e),
        }
    })
}

/// # Safety
/// `ctx` must come from `dk_context_create`, or be null.
#[no_mangle]
pub unsafe extern "C" fn dk_context_free(ctx: *mut DkContext) {
    if !ctx.is_null() {
        drop(Box::from_raw(ctx));
    }
}

/// # Safety
/// `ctx` must be a live handle or null.
#[no_mangle]
pub unsafe extern "C" fn dk_n_ctx(ctx: *const DkContext) -> u32 {
    ctx.as_ref().map_or(0, |c| c.inner.n_ctx() as u32)
}

/// # Safety
/// `ctx` must be a live handle or null.
#[no_mangle]
pub unsafe extern "C" fn dk_n_batch(ctx: *const DkContext) -> u32 {
    ctx.as_ref().map_or(0, |c| c.inner.n_batch() as u32)
}

/// Positions currently held in the context's KV cache.
///
/// # Safety
/// `ctx` must be a live handle or null.
#[no_mangle]
pub unsafe extern "C" fn dk_n_past(ctx: *const DkContext) -> i32 {
    ctx.as_ref().map_or(0, |c| c.inner.n_past() as i32)
}

/// Empty the KV cache without reallocating it.
///
/// # Safety
/// `ctx` must be a live handle not in use on another thread.
#[no_mangle]
pub unsafe extern "C" fn dk_context_clear_cache(ctx: *mut DkContext) -> DkStatus {
    match ctx.as_mut() {
        Some(ctx) => {
            ctx.inner.clear_cache();
            DkStatus::Ok
        }
        None => {
            set_last_error("ctx is null");
            DkStatus::ErrorInvalidArgument
        }
    }
}

// vocabulary

/// Tokenize `text_len` bytes of UTF-8 at `text` into `tokens`.
///
/// On success `*n_out` is the token count. When `n_tokens_max` is too small
/// the status is `ErrorBufferTooSmall` and `*n_out` is the count required.
///
/// # Safety
/// `text` must be readable for `text_len` bytes, `tokens` writable for
/// `n_tokens_max` tokens.
#[no_mangle]
pub unsafe extern "C" fn dk_tokenize(
    model: *const DkModel,
    text: *const c_char,
    text_len: usize,
    tokens: *mut DkToken,
    n_tokens_max: i32,
    add_special: bool,
    parse_special: bool,
    n_out: *mut i32,
) -> DkStatus {
    catch_panic(DkStatus::ErrorInternal, || {
        let Some(model) = model.as_ref() else {
            set_last_error("model is null");
            return DkStatus::ErrorInvalidArgument;
        };
        let bytes = match text_len {
            0 => &[][..],
            _ if text.is_null() => {
                set_last_error("text is null");
                return DkStatus::ErrorInvalidArgument;
            }
            n => std::slice::from_raw_parts(text.cast::<u8>(), n),
        };
        let Ok(text) = std::str::from_utf8(bytes) else {
            set_last_error("text is not valid UTF-8");
            return DkStatus::ErrorInvalidArgument;
        };
        let out = out_slice(tokens, n_tokens_max);
        match model.inner.vocab().tokenize(text, out, add_special, parse_special) {
            Ok(n) => {
                write_len(n_out, n);
                DkStatus::Ok
            }
            Err(e) => vocab_error(e, n_out),
        }
    })
}

/// Render one token's text into `buf` (no NUL is appended).
///
/// `lstrip` removes up to that many leading spaces; `special` renders
/// control tokens instead of skipping them.
///
/// # Safety
/// `buf` must be writable for `buf_len` bytes.
#[no_mangle]
pub unsafe extern "C" fn dk_token_to_piece(
    model: *const DkModel,
    token: DkToken,
    buf: *mut c_char,
    buf_len: i32,
    lstrip: i32,
    special: bool,
    n_out: *mut i32,
) -> DkStatus {
    catch_panic(DkStatus::ErrorInternal, || {
        let Some(model) = model.as_ref() else {
            set_last_error("model is null");
            return DkStatus::ErrorInvalidArgument;
        };
        let out = out_slice(buf.cast::<u8>(), buf_len);
        let lstrip = usize::try_from(lstrip).unwrap_or(0);
        match model.inner.vocab().token_to_piece(token, out, lstrip, special) {
            Ok(n) => {
                write_len(n_out, n);
                DkStatus::Ok
            }
            Err(e) => vocab_error(e, n_out),
        }
    })
}

unsafe fn vocab_error(e: VocabError, n_out: *mut i32) -> DkStatus {
    if let VocabError::BufferTooSmall { required } = e {
        write_len(n_out, required);
    }
    report(&e.into())
}

/// Beginning-of-sequence token, or -1.
///
/// # Safety
/// `model` must be a live handle or null.
#[no_mangle]
pub unsafe extern "C" fn dk_token_bos(model: *const DkModel) -> DkToken {
    model.as_ref().and_then(|m| m.inner.vocab().bos()).unwrap_or(-1)
}

/// End-of-sequence token, or -1.
///
/// # Safety
/// `model` must be a live handle or null.
#[no_mangle]
pub unsafe extern "C" fn dk_token_eos(model: *const DkModel) -> DkToken {
    model.as_ref().and_then(|m| m.inner.vocab().eos()).unwrap_or(-1)
}

/// Newline token, or -1.
///
/// # Safety
/// `model` must be a live handle or null.
#[no_mangle]
pub unsafe extern "C" fn dk_token_nl(model: *const DkModel) -> DkToken {
    model.as_ref().and_then(|m| m.inner.vocab().nl()).unwrap_or(-1)
}

/// Whether `token` ends generation (EOS, EOT).
///
/// # Safety
/// `model` must be a live handle or null.
#[no_mangle]
pub unsafe extern "C" fn dk_token_is_eog(model: *const DkModel, token: DkToken) -> bool {
    model.as_ref().is_some_and(|m| m.inner.vocab().is_eog(token))
}

// batch

/// An empty batch for up to `capacity` tokens. Null if `capacity` is below
/// 1 or above the largest context any `DkContext` can have, since no decode
/// could accept such a batch.
#[no_mangle]
pub extern "C" fn dk_batch_init(capacity: i32) -> *mut DkBatch {
    catch_panic(ptr::null_mut(), || match usize::try_from(capacity) {
        Ok(cap) if cap > 0 && cap <= MAX_CONTEXT_TOKENS => {
            Box::into_raw(Box::new(DkBatch { inner: Batch::new(cap) }))
        }
        _ => {
            set_last_error(format!(
                "invalid batch capacity {capacity}; expected 1..={MAX_CONTEXT_TOKENS}"
            ));
            ptr::null_mut()
        }
    })
}

/// A batch continuing `ctx`'s sequence with `n_tokens` tokens, wanting
/// logits for the last one. Null on error.
///
/// # Safety
/// `tokens` must be readable for `n_tokens` tokens.
#[no_mangle]
pub unsafe extern "C" fn dk_batch_get_one(
    ctx: *const DkContext,
    tokens: *const DkToken,
    n_tokens: i32,
) -> *mut DkBatch {
    catch_panic(ptr::null_mut(), || {
        let Some(ctx) = ctx.as_ref() else {
            set_last_error("ctx is null");
            return ptr::null_mut();
        };
        let tokens = match usize::try_from(n_tokens) {
            Ok(0) => &[][..],
            Ok(n) if !tokens.is_null() => std::slice::from_raw_parts(tokens, n),
            _ => {
                set_last_error("invalid token array");
                return ptr::null_mut();
            }
        };
        match ctx.inner.make_single_sequence_batch(tokens) {
            Ok(batch) => Box::into_raw(Box::new(DkBatch { inner: batch })),
            Err(e) => {
                set_last_error(e.to_string());
                ptr::null_mut()
            }
        }
    })
}

/// Append one token to `batch`.
///
/// # Safety
/// `seq_ids` must be readable for `n_seq_id` ids.
#[no_mangle]
pub unsafe extern "C" fn dk_batch_add(
    batch: *mut DkBatch,
    token: DkToken,
    pos: i32,
    seq_ids: *const i32,
    n_seq_id: i32,
    logits: bool,
) -> DkStatus {
    catch_panic(DkStatus::ErrorInternal, || {
        let Some(batch) = batch.as_mut() else {
            set_last_error("batch is null");
            return DkStatus::ErrorInvalidArgument;
        };
        let ids = match usize::try_from(n_seq_id) {
            Ok(n) if n > 0 && !seq_ids.is_null() => std::slice::from_raw_parts(seq_ids, n),
            _ => &[][..],
        };
        match batch.inner.add(token, pos, ids, logits) {
            Ok(()) => DkStatus::Ok,
            Err(e) => report(&e.into()),
        }
    })
}

/// # Safety
/// `batch` must be a live handle or null.
#[no_mangle]
pub unsafe extern "C" fn dk_batch_clear(batch: *mut DkBatch) {
    if let Some(batch) = batch.as_mut() {
        batch.inner.clear();
    }
}

/// # Safety
/// `batch` must come from `dk_batch_init` / `dk_batch_get_one`, or be null.
#[no_mangle]
pub unsafe extern "C" fn dk_batch_free(batch: *mut DkBatch) {
    if !batch.is_null() {
        drop(Box::from_raw(batch));
    }
}

// decode

/// Run `batch` through the model.
///
/// Returns 0 on success, 1 when the KV cache has no room (nothing changed),
/// -1 for an invalid batch, -2 for a poisoned context, -3 when the forward
/// pass failed (the context is now poisoned).
///
/// # Safety
/// Both handles must be live; `ctx` must not be in use on another thread.
#[no_mangle]
pub unsafe extern "C" fn dk_decode(ctx: *mut DkContext, batch: *const DkBatch) -> i32 {
    catch_panic(-3, || {
        let (Some(ctx), Some(batch)) = (ctx.as_mut(), batch.as_ref()) else {
            set_last_error("null argument");
            return -1;
        };
        match ctx.inner.decode(&batch.inner) {
            Ok(()) => 0,
            Err(e) => {
                set_last_error(e.to_string());
                e.code()
            }
        }
    })
}

/// Decode a prompt of `n_tokens` tokens in as many `n_batch`-sized batches
/// as it needs; only the last token gets logits. Returns the same codes as
/// `dk_decode`. A prompt that does not fit or holds an unknown token is
/// refused before anything is decoded.
///
/// # Safety
/// `ctx` must be a live handle not in use on another thread; `tokens` must
/// be readable for `n_tokens` tokens.
#[no_mangle]
pub unsafe extern "C" fn dk_decode_prompt(
    ctx: *mut DkContext,
    tokens: *const DkToken,
    n_tokens: i32,
) -> i32 {
    catch_panic(-3, || {
        let Some(ctx) = ctx.as_mut() else {
            set_last_error("ctx is null");
            return -1;
        };
        let tokens = match usize::try_from(n_tokens) {
            Ok(0) => &[][..],
            Ok(n) if !tokens.is_null() => std::slice::from_raw_parts(tokens, n),
            _ => {
                set_last_error("invalid token array");
                return -1;
            }
        };
        match ctx.inner.decode_prompt(tokens) {
            Ok(()) => 0,
            Err(dk_session::Error::Decode(e)) => {
                set_last_error(e.to_string());
                e.code()
            }
            Err(e) => {
                set_last_error(e.to_string());
                -1
            }
        }
    })
}

/// All logits of the last decode, `n_outputs * n_vocab` floats, or null.
/// Valid until the next decode or until the context is freed.
///
/// # Safety
/// `ctx` must be a live handle or null.
#[no_mangle]
pub unsafe extern "C" fn dk_get_logits(ctx: *const DkContext) -> *const f32 {
    ctx.as_ref()
        .and_then(|c| c.inner.get_logits())
        .map_or(ptr::null(), <[f32]>::as_ptr)
}

/// Logits row for batch index `i` (negative counts back from the last
/// output), or null when that token's logits were not requested.
///
/// # Safety
/// `ctx` must be a live handle or null.
#[no_mangle]
pub unsafe extern "C" fn dk_get_logits_ith(ctx: *const DkContext, i: i32) -> *const f32 {
    ctx.as_ref()
        .and_then(|c| c.inner.get_logits_ith(i))
        .map_or(ptr::null(), <[f32]>::as_ptr)
}

/// # Safety
/// `ctx` must be a live handle or null.
#[no_mangle]
pub unsafe extern "C" fn dk_get_embeddings(ctx: *const DkContext) -> *const f32 {
    ctx.as_ref()
        .and_then(|c| c.inner.get_embeddings())
        .map_or(ptr::null(), <[f32]>::as_ptr)
}

/// # Safety
/// `ctx` must be a live handle or null.
#[no_mangle]
pub unsafe extern "C" fn dk_get_embeddings_ith(ctx: *const DkContext, i: i32) -> *const f32 {
    ctx.as_ref()
        .and_then(|c| c.inner.get_embeddings_ith(i))
        .map_or(ptr::null(), <[f32]>::as_ptr)
}

// errors

/// The calling thread's last error message, or null. Free the result with
/// `dk_free_string`.
#[no_mangle]
pub extern "C" fn dk_last_error() -> *mut c_char {
    match error::take_last_error() {
        Some(e) => e.into_raw(),
        None => ptr::null_mut(),
    }
}

/// Free a string returned by `dk_last_error`.
///
/// # Safety
/// `s` must come from `dk_last_error`, or be null.
#[no_mangle]
pub unsafe extern "C" fn dk_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::CString;

    use dk_model::synthetic::SyntheticLlama;

    use super::*;

    struct Loaded {
        _dir: tempfile::TempDir,
        model: *mut DkModel,
    }

    impl Drop for Loaded {
        fn drop(&mut self) {
            unsafe { dk_model_free(self.model) };
        }
    }

    fn load() -> Loaded {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.gguf");
        SyntheticLlama::default().write_to(&path).unwrap();
        let c_path = CString::new(path.to_str().unwrap()).unwrap();
        let mut model = ptr::null_mut();
        assert_eq!(dk_backend_init(), DkStatus::Ok);
        let status =
            unsafe { dk_model_load(c_path.as_ptr(), dk_model_default_params(), &mut model) };
        assert_eq!(status, DkStatus::Ok);
        Loaded { _dir: dir, model }
    }

    fn last_error() -> String {
        let p = dk_last_error();
        assert!(!p.is_null());
        let s = unsafe { CStr::from_ptr(p) }.to_str().unwrap().to_string();
        unsafe { dk_free_string(p) };
        s
    }

    #[test]
    fn test_load_missing_model() {
        let path = CString::new("/no/such/model.gguf").unwrap();
        let mut model = ptr::null_mut();
        let status =
            unsafe { dk_model_load(path.as_ptr(), dk_model_default_params(), &mut model) };
        assert_eq!(status, DkStatus::ErrorModelLoad);
        assert!(model.is_null());
        assert!(last_error().contains("model.gguf"));
    }

    #[test]
    fn test_generate_through_c_api() {
        let loaded = load();
        let model = loaded.model;
        unsafe {
            let n_vocab = dk_model_n_vocab(model);
            assert_eq!(n_vocab as usize, SyntheticLlama::default().n_vocab());
            assert_eq!(dk_model_n_embd(model), 16);

            let mut params = dk_context_default_params();
            params.n_ctx = 16;
            params.n_threads = 1;
            let mut ctx = ptr::null_mut();
            assert_eq!(dk_context_create(model, params, &mut ctx), DkStatus::Ok);
            assert_eq!(dk_n_ctx(ctx), 16);

            let text = "hello world";
            let mut tokens = [0 as DkToken; 32];
            let mut n = 0;
            let status = dk_tokenize(
                model,
                text.as_ptr().cast(),
                text.len(),
                tokens.as_mut_ptr(),
                32,
                true,
                false,
                &mut n,
            );
            assert_eq!(status, DkStatus::Ok);
            assert_eq!(tokens[0], dk_token_bos(model));

            let batch = dk_batch_get_one(ctx, tokens.as_ptr(), n);
            assert!(!batch.is_null());
            assert_eq!(dk_decode(ctx, batch), 0);
            dk_batch_free(batch);
            assert_eq!(dk_n_past(ctx), n);
            assert!(!dk_get_logits_ith(ctx, -1).is_null());
            assert!(dk_get_embeddings(ctx).is_null());

            let chain = dk_sampler_chain_init(dk_sampler_chain_default_params());
            assert_eq!(dk_sampler_chain_add(chain, dk_sampler_init_top_k(1)), DkStatus::Ok);
            assert_eq!(dk_sampler_chain_add(chain, dk_sampler_init_dist(5)), DkStatus::Ok);
            assert_eq!(dk_sampler_chain_n(chain), 2);
            let mut token = -1;
            assert_eq!(dk_sampler_sample(chain, ctx, -1, &mut token), DkStatus::Ok);
            assert!(token >= 0 && token < n_vocab);

            let mut piece = [0 as c_char; 16];
            let mut len = 0;
            let status =
                dk_token_to_piece(model, token, piece.as_mut_ptr(), 16, 0, false, &mut len);
            assert_eq!(status, DkStatus::Ok);

            let one = [token];
            let batch = dk_batch_get_one(ctx, one.as_ptr(), 1);
            assert_eq!(dk_decode(ctx, batch), 0);
            dk_batch_free(batch);
            assert_eq!(dk_n_past(ctx), n + 1);

            dk_sampler_chain_free(chain);
            dk_context_free(ctx);
        }
    }

    #[test]
    fn test_status_codes_cross_boundary() {
        let loaded = load();
        unsafe {
            let mut params = dk_context_default_params();
            params.n_ctx = 2;
            let mut ctx = ptr::null_mut();
            assert_eq!(dk_context_create(loaded.model, params, &mut ctx), DkStatus::Ok);

            let tokens = [1, 270];
            let batch = dk_batch_get_one(ctx, tokens.as_ptr(), 2);
            assert_eq!(dk_decode(ctx, batch), 0);
            dk_batch_free(batch);

            let more = [271];
            let batch = dk_batch_get_one(ctx, more.as_ptr(), 1);
            assert_eq!(dk_decode(ctx, batch), 1);
            assert_eq!(dk_n_past(ctx), 2);
            assert!(last_error().contains("KV"));
            dk_batch_free(batch);

            let batch = dk_batch_init(1);
            let seq = [0];
            assert_eq!(dk_batch_add(batch, 9999, 0, seq.as_ptr(), 1, true), DkStatus::Ok);
            assert_eq!(dk_batch_add(batch, 1, 1, seq.as_ptr(), 1, true), DkStatus::ErrorBatch);
            assert_eq!(dk_decode(ctx, batch), -1);
            dk_batch_free(batch);

            let chain = dk_sampler_chain_init(dk_sampler_chain_default_params());
            let mut token = 0;
            let status = dk_sampler_sample(chain, ctx, 0, &mut token);
            assert_eq!(status, DkStatus::ErrorLogitsUnavailable);
            dk_sampler_chain_free(chain);

            dk_context_free(ctx);
        }
    }

    #[test]
    fn test_buffer_too_small_reports_required() {
        let loaded = load();
        unsafe {
            let text = "hello world";
            let mut tokens = [0 as DkToken; 1];
            let mut n = 0;
            let status = dk_tokenize(
                loaded.model,
                text.as_ptr().cast(),
                text.len(),
                tokens.as_mut_ptr(),
                1,
                true,
                false,
                &mut n,
            );
            assert_eq!(status, DkStatus::ErrorBufferTooSmall);
            assert!(n > 1);

            let mut small = [0 as c_char; 4];
            let mut needed = 0;
            let status = dk_model_desc(loaded.model, small.as_mut_ptr(), 4, &mut needed);
            assert_eq!(status, DkStatus::ErrorBufferTooSmall);
            let mut buf = vec![0 as c_char; needed as usize];
            let status = dk_model_desc(loaded.model, buf.as_mut_ptr(), buf.len(), &mut needed);
            assert_eq!(status, DkStatus::Ok);
            assert!(CStr::from_ptr(buf.as_ptr()).to_str().unwrap().starts_with("llama"));

            let key = CString::new("general.name").unwrap();
            let mut name = [0 as c_char; 32];
            let status = dk_model_meta_val_str(
                loaded.model,
                key.as_ptr(),
                name.as_mut_ptr(),
                32,
                ptr::null_mut(),
            );
            assert_eq!(status, DkStatus::Ok);
            assert_eq!(CStr::from_ptr(name.as_ptr()).to_str().unwrap(), "synthetic");
        }
    }

    #[test]
    fn test_batch_capacity_is_bounded() {
        assert!(dk_batch_init(i32::MAX).is_null());
        assert!(last_error().contains("invalid batch capacity"));
        assert!(dk_batch_init(0).is_null());
        assert!(last_error().contains("invalid batch capacity"));

        let batch = dk_batch_init(MAX_CONTEXT_TOKENS as i32);
        assert!(!batch.is_null());
        unsafe { dk_batch_free(batch) };
    }

    #[test]
    fn test_long_prompt_and_context_seeded_chain() {
        let loaded = load();
        unsafe {
            let mut params = dk_context_default_params();
            params.n_ctx = 16;
            params.n_batch = 2;
            params.n_threads = 1;
            params.seed = 11;
            let mut ctx = ptr::null_mut();
            assert_eq!(dk_context_create(loaded.model, params, &mut ctx), DkStatus::Ok);

            let prompt = [1, 262, 270, 275, 281];
            let batch = dk_batch_get_one(ctx, prompt.as_ptr(), 5);
            assert_eq!(dk_decode(ctx, batch), -1);
            dk_batch_free(batch);
            assert_eq!(dk_decode_prompt(ctx, prompt.as_ptr(), 5), 0);
            assert_eq!(dk_n_past(ctx), 5);
            assert!(!dk_get_logits_ith(ctx, -1).is_null());
            assert_eq!(dk_decode_prompt(ctx, prompt.as_ptr(), 0), -1);

            let a = dk_sampler_chain_init_from_context(ctx);
            let b = dk_sampler_chain_init_from_context(ctx);
            assert_eq!(dk_sampler_chain_n(a), 5);
            let (mut ta, mut tb) = (-1, -2);
            assert_eq!(dk_sampler_sample(a, ctx, -1, &mut ta), DkStatus::Ok);
            assert_eq!(dk_sampler_sample(b, ctx, -1, &mut tb), DkStatus::Ok);
            assert_eq!(ta, tb);
            dk_sampler_chain_free(a);
            dk_sampler_chain_free(b);

            assert!(dk_sampler_chain_init_from_context(ptr::null()).is_null());
            dk_context_free(ctx);
        }
    }
}
