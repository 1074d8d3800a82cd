//! End-to-end pretraining run: resume detection, loading, training, evaluation.

use crate::args::ArgumentBundle;
use crate::checkpoint::{ResumeState, detect_resume};
use crate::collator::DataCollator;
use crate::dataset::{LANG_GROUP, build_eval_dataset, build_train_datasets};
use crate::error::TrainingResult;
use crate::trainer::{
    EVAL_RESULTS_FILE, EvalMetrics, LocalTrainer, TRAINER_STATE_FILE, Trainer, WorldInfo,
    write_eval_results,
};
use std::sync::Arc;

/// Run training and/or evaluation as requested by `args`; returns the evaluation results.
pub async fn run(args: &ArgumentBundle) -> TrainingResult<EvalMetrics> {
    let training = &args.training;
    let resume = detect_resume(
        &training.output_dir,
        training.do_train,
        training.overwrite_output_dir,
        &[args.cache_dir.as_path(), training.logging_dir.as_path()],
    )?;

    tracing::warn!(
        "Process rank: {}, device: cpu, n_gpu: 0, distributed training: {}, 16-bits training: {}",
        training.local_rank,
        training.is_distributed(),
        training.fp16
    );
    tracing::info!("Training/evaluation parameters {}", serde_json::to_string(training)?);

    let model_type = args.data.model_type;
    let bundle = model_type.load_bundle(args)?;

    let train_datasets = build_train_datasets(args, &bundle.tokenizer)?;
    let eval_dataset = build_eval_dataset(args, &bundle.tokenizer)?;

    let collator = DataCollator::new(
        args.data.padding,
        args.data.max_seq_length,
        args.data.max_seq_length_decoder,
        bundle.tokenizer.pad_token_id(),
    );

    let mut trainer =
        LocalTrainer::new(training.clone(), bundle, collator).with_world(WorldInfo::from_env()?);
    if let Some(dataset) = train_datasets.and_then(|mut groups| groups.remove(LANG_GROUP)) {
        trainer = trainer.with_train_dataset(Arc::new(dataset));
    }
    if let Some(dataset) = eval_dataset {
        trainer = trainer.with_eval_dataset(Arc::new(dataset));
    }

    if training.do_train {
        train(&mut trainer, args, &resume).await?;
    }

    let mut results = EvalMetrics::new();
    if training.do_eval {
        tracing::info!("*** Evaluate ***");
        let metrics = trainer.evaluate().await?;
        if trainer.is_world_process_zero() {
            let path = training.output_dir.join(EVAL_RESULTS_FILE);
            std::fs::create_dir_all(&training.output_dir)?;
            write_eval_results(&path, &metrics)?;
            tracing::info!("***** Eval results *****");
            for (key, value) in metrics.iter() {
                tracing::info!("  {key} = {value}");
            }
        }
        results.extend(&metrics);
    }

    Ok(results)
}

async fn train(
    trainer: &mut LocalTrainer,
    args: &ArgumentBundle,
    resume: &ResumeState,
) -> TrainingResult<()> {
    let output_dir = &args.training.output_dir;
    let metrics = trainer.train(resume.checkpoint()).await?;
    trainer.save_model(output_dir).await?;

    if trainer.is_world_process_zero() {
        trainer.tokenizer().save_pretrained(output_dir)?;
        trainer.state().save_to_json(&output_dir.join(TRAINER_STATE_FILE))?;
        for (key, value) in metrics.iter() {
            tracing::info!("  {key} = {value}");
        }
    }
    Ok(())
}
