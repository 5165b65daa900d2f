use clap::Parser;
use cli_args::{Args, Modality};
use color_eyre::eyre;
use fairseq2::{ModelArchitectureVisitor, ModelLoader};
use is_terminal::IsTerminal;

mod audio;
mod cli_args;

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(std::io::stderr().is_terminal())
        .init();

    color_eyre::install()?;

    let args = Args::parse();
    match args {
        Args::Info(args) => info(&args),
        Args::Run(args) => run(&args),
    }
}

fn info(args: &cli_args::Info) -> eyre::Result<()> {
    struct InfoVisitor<'a>(&'a cli_args::Info);
    impl ModelArchitectureVisitor<eyre::Result<()>> for InfoVisitor<'_> {
        fn visit<L: ModelLoader + 'static>(&mut self) -> eyre::Result<()> {
            let model = self.0.model_load.load::<L>()?;

            println!("Hyperparameters: {:#?}", model.hyperparameters());
            println!(
                "Context: {} of {} used",
                bytesize::to_string(model.context().used_mem() as u64, false),
                bytesize::to_string(model.context().mem_size() as u64, false)
            );
            println!("Tensors:");
            for (name, tensor) in model.tensors().iter() {
                println!(
                    "- {name} ({} {:?}, {})",
                    tensor.get_type(),
                    tensor.dims(),
                    bytesize::to_string(tensor.nbytes() as u64, false)
                );
            }

            Ok(())
        }
    }

    args.model_load
        .architecture
        .visit(&mut InfoVisitor(args))
}

#[tracing::instrument(skip_all)]
fn run(args: &cli_args::Run) -> eyre::Result<()> {
    struct RunVisitor<'a>(&'a cli_args::Run);
    impl ModelArchitectureVisitor<eyre::Result<()>> for RunVisitor<'_> {
        fn visit<L: ModelLoader + 'static>(&mut self) -> eyre::Result<()> {
            let args = self.0;
            let model = self.0.model_load.load::<L>()?;

            let waveform = audio::read_wav(&args.audio_path)?;
            let (_input_context, input) = audio::input_tensor(&waveform)?;
            tracing::info!(
                "Decoded {} samples ({:.2}s) from {}",
                input.nelements(),
                waveform.samples.len() as f32 / waveform.sample_rate.max(1) as f32,
                args.audio_path.display()
            );

            println!(
                "Ready to run {} into {} ({}) with {} tensors and an input of {:?} samples",
                args.task,
                args.tgt_lang,
                args.task.output_modality(),
                model.tensors().len(),
                input.dims()
            );

            Ok(())
        }
    }

    if args.task.input_modality() == Modality::Text {
        let Some(src_lang) = &args.src_lang else {
            eyre::bail!("{} takes text input, which requires --src-lang", args.task);
        };
        eyre::bail!(
            "{} from {src_lang} needs tokenized text, which is not supported",
            args.task
        );
    }

    args.model_load.architecture.visit(&mut RunVisitor(args))
}
