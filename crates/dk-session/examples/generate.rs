//! Generate text from a GGUF model.
//!
//! ```text
//! cargo run -p dk-session --example generate -- [model.gguf] [prompt] [n_tokens]
//! ```
//!
//! Without a model path a tiny synthetic model is written to a temporary
//! directory and used instead. Set `RUST_LOG=debug` to see per-decode logs.

use std::error::Error;
use std::io::Write;
use std::path::PathBuf;

use dk_model::synthetic::SyntheticLlama;
use dk_session::sampler::SamplerChain;
use dk_session::{backend, sample, Context, Model, ModelParams};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let path_arg = args.next();
    let prompt = args.next().unwrap_or_else(|| "hello world".to_string());
    let n_predict: usize = match args.next() {
        Some(n) => n.parse()?,
        None => 16,
    };

    let _tmp;
    let path = match path_arg {
        Some(p) => PathBuf::from(p),
        None => {
            let dir = tempfile::tempdir()?;
            let path = dir.path().join("synthetic.gguf");
            SyntheticLlama::default().write_to(&path)?;
            info!(path = %path.display(), "no model given; using a synthetic one");
            _tmp = dir;
            path
        }
    };

    backend::init();
    let model = Model::load(&path, ModelParams::default())?;
    println!("{}", model.desc());

    let mut ctx = Context::new(&model, model.context_params())?;
    let mut chain = SamplerChain::from_params(&ctx.sampling_params());
    let vocab = model.vocab();

    let prompt_tokens = vocab.tokenize_to_vec(&prompt, true, false)?;
    for &t in &prompt_tokens {
        chain.accept(t);
    }
    // prompts longer than n_batch go through in several batches
    ctx.decode_prompt(&prompt_tokens)?;

    let mut stdout = std::io::stdout().lock();
    write!(stdout, "{prompt}")?;
    let mut piece = vec![0u8; 64];
    for _ in 0..n_predict {
        let token = sample(&mut chain, &ctx, -1)?;
        if vocab.is_eog(token) {
            break;
        }
        let n = match vocab.token_to_piece(token, &mut piece, 0, false) {
            Ok(n) => n,
            Err(dk_session::VocabError::BufferTooSmall { required }) => {
                piece.resize(required, 0);
                vocab.token_to_piece(token, &mut piece, 0, false)?
            }
            Err(e) => return Err(e.into()),
        };
        stdout.write_all(&piece[..n])?;
        stdout.flush()?;

        if ctx.n_past() >= ctx.n_ctx() {
            break;
        }
        ctx.decode(&ctx.make_single_sequence_batch(&[token])?)?;
    }
    writeln!(stdout)?;

    let perf = chain.perf();
    info!(
        n_sample = perf.n_sample,
        t_sample_ms = perf.t_sample.as_millis() as u64,
        n_past = ctx.n_past(),
        "done"
    );
    Ok(())
}
