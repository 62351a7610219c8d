//! Subcommand handlers.

use crate::alerts::{CreateAlertRequest, NearbyQuery, create_alert, find_nearby};
use crate::cli::args::{
    AlertsAction, ClassesAction, Command, ConfigAction, EvaluationsAction, GlobalArgs, OutputMode,
    PredictArgs, PredictionsAction, TrainArgs,
};
use crate::config::{
    Config, InferenceDevice, config_file_path, load_config_file, load_default_config,
    resolve_paths, save_config, validate_config,
};
use crate::error::{Error, Result};
use crate::inference::{
    BackboneLoader, ClassPrediction, ClassScore, InferenceService, ModelState, OnnxBackboneLoader,
};
use crate::output::{ResultType, emit_json_result};
use crate::staging::UploadStaging;
use crate::store::{
    AlertStore, ClassRef, ClassUpdate, EvaluationStore, NewEvaluation, NewNotifiableClass,
    NewPrediction, NotifiableClass, NotifiableClassStore, PredictionStore, RecordId, SqliteStore,
};
use crate::training::{TrainingRequest, TrainingStatus, train};
use chrono::{Duration, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const CLI_DEVICE_ID: &str = "cli";

/// Settings shared by every handler.
struct Context {
    config: Config,
    output_mode: OutputMode,
    show_progress: bool,
}

impl Context {
    fn from_args(global: &GlobalArgs) -> Result<Self> {
        let mut config = match &global.config {
            Some(path) => load_config_file(path)?,
            None => load_default_config()?,
        };
        if let Some(db) = &global.db {
            config.storage.database = Some(db.clone());
        }
        validate_config(&config)?;

        Ok(Self {
            config,
            output_mode: global.output_mode,
            show_progress: !global.quiet
                && !global.no_progress
                && global.output_mode == OutputMode::Human,
        })
    }

    fn json(&self) -> bool {
        self.output_mode == OutputMode::Json
    }

    fn open_store(&self) -> Result<SqliteStore> {
        let paths = resolve_paths(&self.config)?;
        SqliteStore::open(&paths.database, self.config.storage.prediction_retention)
    }
}

/// Run one subcommand.
pub fn handle_command(command: Command, global: &GlobalArgs) -> Result<()> {
    let ctx = || Context::from_args(global);
    match command {
        Command::Predict(args) => handle_predict(&args, &ctx()?),
        Command::Train(args) => handle_train(&args, &ctx()?),
        Command::Classes { action } => handle_classes_command(action, &ctx()?),
        Command::Alerts { action } => handle_alerts_command(action, &ctx()?),
        Command::Predictions { action } => handle_predictions_command(action, &ctx()?),
        Command::Evaluations { action } => handle_evaluations_command(action, &ctx()?),
        Command::Config { action } => handle_config_command(action, global),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Internal {
            message: format!("Failed to create async runtime: {e}"),
        })
}

const fn device_override(gpu: bool, cpu: bool) -> Option<InferenceDevice> {
    if gpu {
        Some(InferenceDevice::Gpu)
    } else if cpu {
        Some(InferenceDevice::Cpu)
    } else {
        None
    }
}

#[derive(Debug, Serialize)]
struct PredictionOutput<'a> {
    id: Option<RecordId>,
    file_name: &'a str,
    degraded: bool,
    top: &'a ClassScore,
    scores: &'a ClassPrediction,
}

fn handle_predict(args: &PredictArgs, ctx: &Context) -> Result<()> {
    let mut config = ctx.config.clone();
    if let Some(backbone) = &args.backbone {
        config.model.backbone = Some(backbone.clone());
    }
    if let Some(classifier) = &args.classifier {
        config.model.classifier = Some(classifier.clone());
    }
    if let Some(device) = device_override(args.gpu, args.cpu) {
        config.model.device = device;
    }

    let file_name = args
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::invalid_input(format!("not a file: {}", args.input.display())))?;
    let bytes = std::fs::read(&args.input)?;

    let service = InferenceService::from_config(&config)?;
    let state = runtime()?.block_on(service.load().wait());
    if let ModelState::Failed { reason } = state {
        return Err(Error::ModelLoad { reason });
    }
    if service.is_degraded() {
        warn!("Classifier weights are missing; the prediction comes from an untrained head");
    }

    let staging = UploadStaging::from_config(&config)?;
    let staged = staging.stage(&file_name, &bytes)?;
    let result = service.predict(&staged.path);
    if let Err(e) = staging.release(&staged.path) {
        warn!("Failed to release {}: {e}", staged.path.display());
    }
    let prediction = result?;

    let id = if args.no_save {
        None
    } else {
        let store = ctx.open_store()?;
        Some(store.save_prediction(NewPrediction {
            file_name: file_name.clone(),
            file_path: staged.path.display().to_string(),
            prediction: prediction.clone(),
        })?)
    };

    if ctx.json() {
        emit_json_result(
            ResultType::Prediction,
            &PredictionOutput {
                id,
                file_name: &file_name,
                degraded: service.is_degraded(),
                top: prediction.top(),
                scores: &prediction,
            },
        );
    } else {
        let top = prediction.top();
        println!("{file_name}: {} ({:.1}%)", top.label, top.confidence * 100.0);
        for score in prediction.scores() {
            println!("  {:<24} {:>6.2}%", score.label, score.confidence * 100.0);
        }
        if let Some(id) = id {
            println!("Saved as prediction #{id}");
        }
    }
    Ok(())
}

fn handle_train(args: &TrainArgs, ctx: &Context) -> Result<()> {
    let mut config = ctx.config.clone();
    if let Some(backbone) = &args.backbone {
        config.model.backbone = Some(backbone.clone());
    }
    if let Some(device) = device_override(args.gpu, args.cpu) {
        config.model.device = device;
    }
    let paths = resolve_paths(&config)?;

    let request = TrainingRequest::from_directory(
        &args.dataset,
        &config.storage,
        args.epochs.unwrap_or(config.training.epochs),
        args.batch_size.unwrap_or(config.training.batch_size),
        args.output.clone().unwrap_or(paths.classifier),
    )?;

    let extractor = OnnxBackboneLoader::new(
        paths.backbone,
        config.model.clone(),
        config.spectrogram.image_size,
    )
    .load()?;

    let handle = train(request, &config, extractor, ctx.show_progress)?;
    info!("Training task {}", handle.id());
    match runtime()?.block_on(handle.wait()) {
        TrainingStatus::Completed { report } => {
            if ctx.json() {
                emit_json_result(ResultType::Training, &report);
            } else {
                println!("Training complete: {}", report.model_path.display());
                println!("  Classes:          {}", report.classes.join(", "));
                println!(
                    "  Samples:          {} train, {} test",
                    report.num_training_samples, report.num_test_samples
                );
                println!("  Epochs:           {}", report.num_epochs);
                println!("  Train accuracy:   {:.3}", report.training_accuracy);
                println!("  Val accuracy:     {:.3}", report.validation_accuracy);
                println!(
                    "  Test accuracy:    {:.3} (loss {:.4})",
                    report.test_accuracy, report.test_loss
                );
            }
            Ok(())
        }
        TrainingStatus::Failed { message } => Err(Error::Training { message }),
        other => Err(Error::Internal {
            message: format!("training ended without a result: {other:?}"),
        }),
    }
}

fn parse_class_ref(value: &str) -> ClassRef {
    value
        .parse::<RecordId>()
        .map_or_else(|_| ClassRef::Name(value.to_string()), ClassRef::Id)
}

fn print_class(class: &NotifiableClass) {
    println!(
        "#{:<4} {:<24} min {:.2}  {}{}",
        class.id,
        class.name,
        class.min_confidence,
        if class.is_active { "active" } else { "inactive" },
        class
            .description
            .as_deref()
            .map_or_else(String::new, |d| format!("  {d}"))
    );
}

fn handle_classes_command(action: ClassesAction, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    match action {
        ClassesAction::Add {
            name,
            description,
            min_confidence,
            inactive,
        } => {
            let class = store.create_notifiable_class(NewNotifiableClass {
                name,
                description,
                min_confidence: min_confidence
                    .unwrap_or(ctx.config.alerts.default_min_confidence),
                is_active: !inactive,
            })?;
            if ctx.json() {
                emit_json_result(ResultType::NotifiableClass, &class);
            } else {
                println!("Added notifiable class:");
                print_class(&class);
            }
        }
        ClassesAction::List { all } => {
            let classes = store.list_notifiable_classes(all)?;
            if ctx.json() {
                emit_json_result(ResultType::NotifiableClassList, &classes);
            } else if classes.is_empty() {
                println!("No notifiable classes.");
            } else {
                classes.iter().for_each(print_class);
            }
        }
        ClassesAction::Show { class } => {
            let key = parse_class_ref(&class);
            let found = store
                .get_notifiable_class(&key)?
                .ok_or_else(|| Error::NotFound {
                    what: key.to_string(),
                })?;
            if ctx.json() {
                emit_json_result(ResultType::NotifiableClass, &found);
            } else {
                print_class(&found);
            }
        }
        ClassesAction::Update {
            id,
            name,
            description,
            min_confidence,
            activate,
            deactivate,
        } => {
            let update = ClassUpdate {
                name,
                description,
                min_confidence,
                is_active: if activate {
                    Some(true)
                } else if deactivate {
                    Some(false)
                } else {
                    None
                },
            };
            let class = store.update_notifiable_class(id, &update)?;
            if ctx.json() {
                emit_json_result(ResultType::NotifiableClass, &class);
            } else {
                println!("Updated notifiable class:");
                print_class(&class);
            }
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct CreatedAlert {
    id: RecordId,
}

fn handle_alerts_command(action: AlertsAction, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let now = Utc::now();
    match action {
        AlertsAction::Create {
            class,
            lat,
            lon,
            confidence,
            device_id,
        } => {
            let validity = Duration::try_hours(ctx.config.alerts.validity_hours).ok_or_else(|| {
                Error::ConfigValidation {
                    message: format!(
                        "validity_hours out of range: {}",
                        ctx.config.alerts.validity_hours
                    ),
                }
            })?;
            let id = create_alert(
                &store,
                CreateAlertRequest {
                    class: parse_class_ref(&class),
                    latitude: lat,
                    longitude: lon,
                    confidence,
                    device_id: device_id.unwrap_or_else(|| CLI_DEVICE_ID.to_string()),
                },
                now,
                validity,
            )?;
            if ctx.json() {
                let alert = store.get_alert(id)?;
                match alert {
                    Some(alert) => emit_json_result(ResultType::Alert, &alert),
                    None => emit_json_result(ResultType::Alert, &CreatedAlert { id }),
                }
            } else {
                println!("Created alert #{id}");
            }
        }
        AlertsAction::Nearby {
            lat,
            lon,
            radius,
            class_ids,
            hours,
        } => {
            let query = NearbyQuery {
                class_ids,
                hours_ago: hours,
                ..NearbyQuery::new(
                    lat,
                    lon,
                    radius.unwrap_or(ctx.config.alerts.default_radius_km),
                )
            };
            let alerts = find_nearby(&store, &query, now)?;
            if ctx.json() {
                emit_json_result(ResultType::NearbyAlerts, &alerts);
            } else if alerts.is_empty() {
                println!("No alerts within {} km.", query.radius_km);
            } else {
                for nearby in &alerts {
                    let alert = &nearby.alert;
                    println!(
                        "#{:<5} {:>8.3} km  class #{}  conf {:.2}  {}{}",
                        alert.id,
                        nearby.distance_km,
                        alert.class_id,
                        alert.confidence,
                        alert.created_at.to_rfc3339(),
                        if alert.is_active_at(now) { "" } else { " (expired)" }
                    );
                }
            }
        }
    }
    Ok(())
}

fn handle_predictions_command(action: PredictionsAction, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    match action {
        PredictionsAction::List { limit } => {
            let predictions = store.list_recent_predictions(limit)?;
            if ctx.json() {
                emit_json_result(ResultType::PredictionList, &predictions);
            } else if predictions.is_empty() {
                println!("No predictions stored.");
            } else {
                for p in &predictions {
                    println!(
                        "#{:<5} {}  {:<32} {} ({:.1}%)",
                        p.id,
                        p.created_at.to_rfc3339(),
                        p.file_name,
                        p.top_class,
                        p.top_confidence * 100.0
                    );
                }
            }
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct EvaluationOutput {
    id: RecordId,
    moved_to: Option<PathBuf>,
}

/// Move an evaluated recording out of the staging rotation, if it can be found.
fn archive_recording(config: &Config, recording: &str) -> Option<PathBuf> {
    let staging = UploadStaging::from_config(config)
        .inspect_err(|e| warn!("Upload staging unavailable: {e}"))
        .ok()?;
    let path = staging
        .find_by_recording_name(recording)
        .inspect_err(|e| info!("Recording not archived: {e}"))
        .ok()?;
    if path.starts_with(staging.upload_dir().join(crate::constants::storage::EVALUATED_DIR)) {
        return Some(path);
    }
    staging
        .move_to_evaluated(&path, recording)
        .inspect_err(|e| warn!("Failed to archive {}: {e}", path.display()))
        .ok()
}

fn handle_evaluations_command(action: EvaluationsAction, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    match action {
        EvaluationsAction::Add {
            recording,
            class,
            confidence,
            correct,
            wrong: _,
            feedback,
        } => {
            if let Some(feedback) = feedback {
                info!("Feedback for {recording}: {feedback}");
            }
            let recording_name = Path::new(&recording)
                .file_name()
                .map_or_else(|| recording.clone(), |n| n.to_string_lossy().into_owned());
            let id = store.add_evaluation(NewEvaluation {
                device_id: CLI_DEVICE_ID.to_string(),
                recording_date: Utc::now(),
                recording_name: recording_name.clone(),
                detection_class: class,
                detection_confidence: confidence,
                success: correct,
            })?;
            let moved_to = if correct {
                archive_recording(&ctx.config, &recording_name)
            } else {
                None
            };

            if ctx.json() {
                emit_json_result(ResultType::Evaluation, &EvaluationOutput { id, moved_to });
            } else {
                println!("Recorded evaluation #{id}");
                if let Some(path) = moved_to {
                    println!("Recording archived to {}", path.display());
                }
            }
        }
        EvaluationsAction::Stats => {
            let stats = store.evaluation_stats()?;
            if ctx.json() {
                emit_json_result(ResultType::EvaluationStats, &stats);
            } else {
                let overall = &stats.overall;
                println!(
                    "Overall: {} evaluation(s), {} correct, {} wrong, success {:.1}%, mean confidence {:.3}",
                    overall.total,
                    overall.successful,
                    overall.unsuccessful,
                    overall.success_rate() * 100.0,
                    overall.average_confidence
                );
                for class in &stats.by_class {
                    let s = &class.summary;
                    println!(
                        "  {:<24} {:>5} total  {:>5.1}% success  mean confidence {:.3}",
                        class.detection_class,
                        s.total,
                        s.success_rate() * 100.0,
                        s.average_confidence
                    );
                }
            }
        }
    }
    Ok(())
}

fn handle_config_command(action: ConfigAction, global: &GlobalArgs) -> Result<()> {
    let path = match &global.config {
        Some(path) => path.clone(),
        None => config_file_path()?,
    };

    match action {
        ConfigAction::Init => {
            if path.exists() {
                println!("Configuration file already exists: {}", path.display());
            } else {
                save_config(&Config::default(), &path)?;
                println!("Created configuration file: {}", path.display());
            }
        }
        ConfigAction::Show => {
            let mut config = load_config_file(&path)?;
            if let Some(db) = &global.db {
                config.storage.database = Some(db.clone());
            }
            if global.output_mode == OutputMode::Json {
                emit_json_result(ResultType::Config, &config);
            } else {
                let text = toml::to_string_pretty(&config)
                    .map_err(|e| Error::ConfigSerialize { source: e })?;
                println!("{text}");
            }
        }
        ConfigAction::Path => {
            println!("{}", path.display());
        }
    }
    Ok(())
}
