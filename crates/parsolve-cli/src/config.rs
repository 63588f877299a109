use crate::cli::BatchArgs;
use crate::error::{CliError, Result};
use crate::utils::parser;
use parsolve::core::generate::RandomLeastSquares;
use parsolve::core::problem::ConeSpec;
use parsolve::engine::backend::process::WorkerCommand;
use parsolve::engine::config::{BackendKind, DispatchConfig, DispatchConfigBuilder, ErrorPolicy};
use parsolve::workflows::batch::BatchRequest;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

mod defaults;
use defaults::DefaultsConfig;

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialDispatchConfig {
    backend: Option<String>,
    workers: Option<usize>,
    on_error: Option<String>,
    verbose: Option<bool>,
    timeout_ms: Option<u64>,
    /// Program and arguments for isolated workers; defaults to `<this binary> worker`.
    worker_command: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialSolverConfig {
    max_iters: Option<usize>,
    eps_abs: Option<f64>,
    eps_rel: Option<f64>,
    alpha: Option<f64>,
    rho: Option<f64>,
    warm_start: Option<bool>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialProblemConfig {
    count: Option<usize>,
    size: Option<usize>,
    first_seed: Option<u64>,
    cone: Option<String>,
    column_divisor: Option<usize>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct PartialWorkflowConfig {
    backends: Option<Vec<String>>,
    tolerance: Option<f64>,
    repeats: Option<usize>,
}

/// Everything a config file may set. Every field is optional; missing values fall back to
/// [`DefaultsConfig`].
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct PartialRunConfig {
    dispatch: Option<PartialDispatchConfig>,
    solver: Option<PartialSolverConfig>,
    problem: Option<PartialProblemConfig>,
    workflow: Option<PartialWorkflowConfig>,
}

/// Per-command flags that are not part of [`BatchArgs`].
#[derive(Debug, Default, Clone)]
pub struct WorkflowOverrides {
    pub backend: Option<BackendKind>,
    pub backends: Vec<BackendKind>,
    pub tolerance: Option<f64>,
    pub repeats: Option<usize>,
}

/// Fully resolved settings for one command invocation.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub dispatch: DispatchConfig,
    pub request: BatchRequest,
    pub source: RandomLeastSquares,
    pub backends: Vec<BackendKind>,
    pub tolerance: f64,
    pub repeats: usize,
}

impl PartialRunConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::from_file)
    }

    /// Resolves the final configuration. Precedence, highest first: command-line flags,
    /// `-S KEY=VALUE` assignments, the config file, built-in defaults.
    pub fn merge_with_cli(
        mut self,
        args: &BatchArgs,
        extra: &WorkflowOverrides,
    ) -> Result<RunConfig> {
        self.apply_set_values(&args.set_values)?;
        let defaults = DefaultsConfig::default();

        let dispatch_file = self.dispatch.take().unwrap_or_default();
        let solver_file = self.solver.take().unwrap_or_default();
        let problem_file = self.problem.take().unwrap_or_default();
        let workflow_file = self.workflow.take().unwrap_or_default();

        let backend = match extra.backend {
            Some(kind) => kind,
            None => parse_named(dispatch_file.backend.as_deref())?.unwrap_or(defaults.backend),
        };
        let on_error = match args.on_error {
            Some(policy) => policy,
            None => parse_named(dispatch_file.on_error.as_deref())?.unwrap_or(defaults.on_error),
        };
        let verbose = args.trace_solver || dispatch_file.verbose.unwrap_or(false);

        let mut builder = DispatchConfigBuilder::new()
            .worker_count(args.workers.or(dispatch_file.workers).unwrap_or(defaults.workers))
            .backend(backend)
            .on_error(on_error)
            .verbose(verbose);
        if let Some(ms) = args.timeout_ms.or(dispatch_file.timeout_ms) {
            builder = builder.task_timeout(Duration::from_millis(ms));
        }
        if let Some(command) = dispatch_file.worker_command {
            builder = builder.worker_command(worker_command(command)?);
        }
        let dispatch = builder.build()?;

        let cone = match args.cone.as_deref().or(problem_file.cone.as_deref()) {
            Some(name) => parser::parse_cone(name).map_err(|e| CliError::Argument(e.to_string()))?,
            None => ConeSpec::default(),
        };
        let mut source = RandomLeastSquares::new(cone);
        if let Some(divisor) = problem_file.column_divisor {
            if divisor == 0 {
                return Err(CliError::Config(
                    "`problem.column-divisor` must be greater than zero.".to_string(),
                ));
            }
            source.column_divisor = divisor;
        }

        let size = args.size.or(problem_file.size).unwrap_or(defaults.size);
        if size == 0 {
            return Err(CliError::Config(
                "`problem.size` must be greater than zero.".to_string(),
            ));
        }
        let mut request = BatchRequest::new(
            size,
            args.count.or(problem_file.count).unwrap_or(defaults.count),
            args.first_seed
                .or(problem_file.first_seed)
                .unwrap_or(defaults.first_seed),
        );

        let settings = &mut request.settings;
        settings.max_iters = args
            .max_iters
            .or(solver_file.max_iters)
            .unwrap_or(settings.max_iters);
        settings.eps_abs = args.eps_abs.or(solver_file.eps_abs).unwrap_or(settings.eps_abs);
        settings.eps_rel = args.eps_rel.or(solver_file.eps_rel).unwrap_or(settings.eps_rel);
        settings.alpha = solver_file.alpha.unwrap_or(settings.alpha);
        settings.rho = solver_file.rho.or(settings.rho);
        settings
            .validate()
            .map_err(|e| CliError::Config(e.to_string()))?;
        request.overrides.warm_start = solver_file.warm_start.unwrap_or(false);

        let backends = if !extra.backends.is_empty() {
            extra.backends.clone()
        } else if let Some(names) = workflow_file.backends {
            names
                .iter()
                .map(|name| BackendKind::from_str(name))
                .collect::<std::result::Result<Vec<_>, _>>()?
        } else {
            defaults.compare_backends
        };

        let tolerance = extra
            .tolerance
            .or(workflow_file.tolerance)
            .unwrap_or(defaults.tolerance);
        if !(tolerance.is_finite() && tolerance >= 0.0) {
            return Err(CliError::Config(format!(
                "Tolerance must be a finite non-negative number, got {}.",
                tolerance
            )));
        }

        let repeats = extra
            .repeats
            .or(workflow_file.repeats)
            .unwrap_or(defaults.repeats);
        if repeats == 0 {
            return Err(CliError::Config(
                "`workflow.repeats` must be greater than zero.".to_string(),
            ));
        }

        Ok(RunConfig {
            dispatch,
            request,
            source,
            backends,
            tolerance,
            repeats,
        })
    }

    fn apply_set_values(&mut self, set_values: &[String]) -> Result<()> {
        for kv_pair in set_values {
            let (key, value) =
                parser::parse_assignment(kv_pair).map_err(|e| CliError::Config(e.to_string()))?;

            match key {
                "dispatch.backend" => self.dispatch_mut().backend = Some(value.to_string()),
                "dispatch.workers" => self.dispatch_mut().workers = Some(parse_value(key, value)?),
                "dispatch.on-error" => self.dispatch_mut().on_error = Some(value.to_string()),
                "dispatch.verbose" => self.dispatch_mut().verbose = Some(parse_value(key, value)?),
                "dispatch.timeout-ms" => {
                    self.dispatch_mut().timeout_ms = Some(parse_value(key, value)?)
                }
                "solver.max-iters" => self.solver_mut().max_iters = Some(parse_value(key, value)?),
                "solver.eps-abs" => self.solver_mut().eps_abs = Some(parse_value(key, value)?),
                "solver.eps-rel" => self.solver_mut().eps_rel = Some(parse_value(key, value)?),
                "solver.alpha" => self.solver_mut().alpha = Some(parse_value(key, value)?),
                "solver.rho" => self.solver_mut().rho = Some(parse_value(key, value)?),
                "solver.warm-start" => {
                    self.solver_mut().warm_start = Some(parse_value(key, value)?)
                }
                "problem.count" => self.problem_mut().count = Some(parse_value(key, value)?),
                "problem.size" => self.problem_mut().size = Some(parse_value(key, value)?),
                "problem.first-seed" => {
                    self.problem_mut().first_seed = Some(parse_value(key, value)?)
                }
                "problem.cone" => self.problem_mut().cone = Some(value.to_string()),
                "problem.column-divisor" => {
                    self.problem_mut().column_divisor = Some(parse_value(key, value)?)
                }
                "workflow.tolerance" => {
                    self.workflow_mut().tolerance = Some(parse_value(key, value)?)
                }
                "workflow.repeats" => self.workflow_mut().repeats = Some(parse_value(key, value)?),
                "workflow.backends" => {
                    self.workflow_mut().backends =
                        Some(value.split(',').map(|s| s.trim().to_string()).collect())
                }
                _ => {
                    return Err(CliError::Config(format!(
                        "Unsupported configuration key for --set: '{}'",
                        key
                    )));
                }
            }
        }
        Ok(())
    }

    fn dispatch_mut(&mut self) -> &mut PartialDispatchConfig {
        self.dispatch.get_or_insert_with(Default::default)
    }

    fn solver_mut(&mut self) -> &mut PartialSolverConfig {
        self.solver.get_or_insert_with(Default::default)
    }

    fn problem_mut(&mut self) -> &mut PartialProblemConfig {
        self.problem.get_or_insert_with(Default::default)
    }

    fn workflow_mut(&mut self) -> &mut PartialWorkflowConfig {
        self.workflow.get_or_insert_with(Default::default)
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        CliError::Config(format!(
            "Invalid value for {}: '{}' ({} expected)",
            key,
            value,
            std::any::type_name::<T>()
        ))
    })
}

fn parse_named<T>(value: Option<&str>) -> Result<Option<T>>
where
    T: FromStr<Err = parsolve::engine::config::ConfigError>,
{
    value.map(T::from_str).transpose().map_err(CliError::from)
}

fn worker_command(parts: Vec<String>) -> Result<WorkerCommand> {
    let mut parts = parts.into_iter();
    let program = parts.next().ok_or_else(|| {
        CliError::Config("`dispatch.worker-command` must name a program.".to_string())
    })?;
    Ok(parts.fold(WorkerCommand::new(program), |command, arg| command.arg(arg)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn merge(partial: PartialRunConfig, args: &BatchArgs) -> Result<RunConfig> {
        partial.merge_with_cli(args, &WorkflowOverrides::default())
    }

    #[test]
    fn defaults_apply_without_a_file() {
        let config = merge(PartialRunConfig::default(), &BatchArgs::default()).unwrap();
        assert_eq!(config.dispatch.backend, BackendKind::SharedThread);
        assert_eq!(config.dispatch.on_error, ErrorPolicy::CollectAll);
        assert!(!config.dispatch.verbose);
        assert_eq!(config.request.len(), 20);
        assert_eq!(config.request.size, 1000);
        assert_eq!(config.request.seeds.start, 0);
        assert_eq!(config.backends, BackendKind::ALL.to_vec());
        assert_eq!(config.repeats, 5);
    }

    #[test]
    fn file_values_are_read() {
        let file = write_config(
            r#"
            [dispatch]
            backend = "isolated-process"
            workers = 3
            on-error = "fail-fast"
            timeout-ms = 2500
            worker-command = ["/usr/local/bin/parsolve", "worker"]

            [solver]
            max-iters = 400
            eps-abs = 1e-6
            rho = 2.0
            warm-start = true

            [problem]
            count = 7
            size = 120
            first-seed = 42
            cone = "non-negative"
            column-divisor = 4

            [workflow]
            backends = ["sequential", "shared-thread"]
            tolerance = 1e-6
            "#,
        );
        let partial = PartialRunConfig::from_file(file.path()).unwrap();
        let config = merge(partial, &BatchArgs::default()).unwrap();

        assert_eq!(config.dispatch.backend, BackendKind::IsolatedProcess);
        assert_eq!(config.dispatch.worker_count.get(), 3);
        assert_eq!(config.dispatch.on_error, ErrorPolicy::FailFast);
        assert_eq!(
            config.dispatch.process.task_timeout,
            Some(Duration::from_millis(2500))
        );
        assert_eq!(
            config
                .dispatch
                .process
                .worker_command
                .as_ref()
                .map(ToString::to_string),
            Some("/usr/local/bin/parsolve worker".to_string())
        );
        assert_eq!(config.request.settings.max_iters, 400);
        assert_eq!(config.request.settings.eps_abs, 1e-6);
        assert_eq!(config.request.settings.rho, Some(2.0));
        assert!(config.request.overrides.warm_start);
        assert_eq!(config.request.seeds, 42..49);
        assert_eq!(config.request.size, 120);
        assert_eq!(config.source.cone, ConeSpec::NonNegative);
        assert_eq!(config.source.column_divisor, 4);
        assert_eq!(
            config.backends,
            vec![BackendKind::Sequential, BackendKind::SharedThread]
        );
        assert_eq!(config.tolerance, 1e-6);
    }

    #[test]
    fn cli_flags_beat_set_values_which_beat_the_file() {
        let file = write_config("[dispatch]\nworkers = 2\n[problem]\ncount = 5\nsize = 50\n");
        let partial = PartialRunConfig::from_file(file.path()).unwrap();
        let args = BatchArgs {
            workers: Some(6),
            set_values: vec![
                "dispatch.workers=4".to_string(),
                "problem.count=9".to_string(),
            ],
            ..BatchArgs::default()
        };
        let config = merge(partial, &args).unwrap();
        assert_eq!(config.dispatch.worker_count.get(), 6);
        assert_eq!(config.request.len(), 9);
        assert_eq!(config.request.size, 50);
    }

    #[test]
    fn command_backend_overrides_the_file() {
        let file = write_config("[dispatch]\nbackend = \"sequential\"\n");
        let partial = PartialRunConfig::from_file(file.path()).unwrap();
        let extra = WorkflowOverrides {
            backend: Some(BackendKind::IsolatedProcess),
            ..WorkflowOverrides::default()
        };
        let config = partial
            .merge_with_cli(&BatchArgs::default(), &extra)
            .unwrap();
        assert_eq!(config.dispatch.backend, BackendKind::IsolatedProcess);
    }

    #[test]
    fn trace_solver_turns_on_verbose_dispatch() {
        let args = BatchArgs {
            trace_solver: true,
            ..BatchArgs::default()
        };
        let config = merge(PartialRunConfig::default(), &args).unwrap();
        assert!(config.dispatch.verbose);
        assert!(config.request.settings_for(&config.dispatch).verbose);
    }

    #[test]
    fn unknown_keys_in_the_file_are_rejected() {
        let file = write_config("[dispatch]\nthreads = 4\n");
        assert!(matches!(
            PartialRunConfig::from_file(file.path()),
            Err(CliError::FileParsing { .. })
        ));
    }

    #[test]
    fn unsupported_set_key_is_reported() {
        let args = BatchArgs {
            set_values: vec!["solver.gamma=1".to_string()],
            ..BatchArgs::default()
        };
        let err = merge(PartialRunConfig::default(), &args).unwrap_err();
        assert!(err.to_string().contains("solver.gamma"));
    }

    #[test]
    fn invalid_values_are_reported() {
        let bad_number = BatchArgs {
            set_values: vec!["dispatch.workers=many".to_string()],
            ..BatchArgs::default()
        };
        assert!(matches!(
            merge(PartialRunConfig::default(), &bad_number),
            Err(CliError::Config(_))
        ));

        let zero_workers = BatchArgs {
            workers: Some(0),
            ..BatchArgs::default()
        };
        assert!(matches!(
            merge(PartialRunConfig::default(), &zero_workers),
            Err(CliError::Config(msg)) if msg.contains("worker_count")
        ));

        let bad_backend = BatchArgs {
            set_values: vec!["dispatch.backend=gpu".to_string()],
            ..BatchArgs::default()
        };
        assert!(merge(PartialRunConfig::default(), &bad_backend).is_err());

        let bad_tolerance = BatchArgs {
            eps_abs: Some(-1.0),
            ..BatchArgs::default()
        };
        assert!(merge(PartialRunConfig::default(), &bad_tolerance).is_err());
    }

    #[test]
    fn cone_flag_is_parsed() {
        let args = BatchArgs {
            cone: Some("box:-1,1".to_string()),
            ..BatchArgs::default()
        };
        let config = merge(PartialRunConfig::default(), &args).unwrap();
        assert_eq!(
            config.source.cone,
            ConeSpec::Box {
                lower: -1.0,
                upper: 1.0
            }
        );
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let args = BatchArgs {
            timeout_ms: Some(0),
            ..BatchArgs::default()
        };
        assert!(merge(PartialRunConfig::default(), &args).is_err());
    }
}
