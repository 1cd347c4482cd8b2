//! Demo command set driven by the `param-bind` binary.

use std::path::PathBuf;
use std::sync::Arc;

use param_bind_core::{
    CommandSpecs, Decoder, ExecConfig, ExecError, FieldDecl, InitFn, Initialize, Params,
    ParamSpec, RuleError, RuleSet, Slot, SpecError, init_hook, spec_of,
};
use serde::Serialize;
use serde_json::Value;

/// Flags shared by every demo command.
#[derive(Debug, Default, Serialize)]
pub struct GlobalOptions {
    pub verbose: bool,
    pub config: Option<PathBuf>,
}

impl Params for GlobalOptions {
    fn fields() -> Vec<FieldDecl> {
        vec![
            FieldDecl::flag::<bool>("verbose", "verbose").alias("v").elide(true),
            FieldDecl::flag::<Option<PathBuf>>("config", "config").alias("c"),
        ]
    }

    fn field_mut(&mut self, index: usize) -> Option<Slot<'_>> {
        match index {
            0 => Some(Slot::value(&mut self.verbose)),
            1 => Some(Slot::value(&mut self.config)),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct Retry {
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Initialize for Retry {
    fn initialize(&mut self) -> Result<(), RuleError> {
        if self.attempts == 0 {
            self.attempts = 3;
        }
        if self.backoff_ms == 0 {
            self.backoff_ms = 500;
        }
        Ok(())
    }
}

impl Params for Retry {
    const INIT: Option<InitFn> = Some(init_hook::<Self>);

    fn fields() -> Vec<FieldDecl> {
        vec![
            FieldDecl::flag::<u32>("attempts", "retry-attempts"),
            FieldDecl::flag::<u64>("backoff_ms", "retry-backoff-ms"),
        ]
    }

    fn field_mut(&mut self, index: usize) -> Option<Slot<'_>> {
        match index {
            0 => Some(Slot::value(&mut self.attempts)),
            1 => Some(Slot::value(&mut self.backoff_ms)),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct DeployParams {
    pub global: GlobalOptions,
    pub environment: String,
    pub replicas: u32,
    pub dry_run: bool,
    pub retry: Option<Retry>,
    pub services: Vec<String>,
}

impl Params for DeployParams {
    fn fields() -> Vec<FieldDecl> {
        vec![
            FieldDecl::inline::<GlobalOptions>("global"),
            FieldDecl::flag::<String>("environment", "environment").alias("e"),
            FieldDecl::flag::<u32>("replicas", "replicas"),
            FieldDecl::flag::<bool>("dry_run", "dry-run").alias("n").elide(true),
            FieldDecl::inline::<Retry>("retry"),
            FieldDecl::argument::<Vec<String>>("services"),
        ]
    }

    fn field_mut(&mut self, index: usize) -> Option<Slot<'_>> {
        match index {
            0 => Some(Slot::inline(&mut self.global)),
            1 => Some(Slot::value(&mut self.environment)),
            2 => Some(Slot::value(&mut self.replicas)),
            3 => Some(Slot::value(&mut self.dry_run)),
            4 => Some(Slot::optional(&mut self.retry)),
            5 => Some(Slot::value(&mut self.services)),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct RollbackParams {
    pub global: GlobalOptions,
    pub revision: Option<u32>,
    pub services: Vec<String>,
}

impl Params for RollbackParams {
    fn fields() -> Vec<FieldDecl> {
        vec![
            FieldDecl::inline::<GlobalOptions>("global"),
            FieldDecl::flag::<Option<u32>>("revision", "revision").alias("r"),
            FieldDecl::argument::<Vec<String>>("services"),
        ]
    }

    fn field_mut(&mut self, index: usize) -> Option<Slot<'_>> {
        match index {
            0 => Some(Slot::inline(&mut self.global)),
            1 => Some(Slot::value(&mut self.revision)),
            2 => Some(Slot::value(&mut self.services)),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct StatusParams {
    pub global: GlobalOptions,
    pub format: String,
    pub watch: bool,
}

impl Params for StatusParams {
    fn fields() -> Vec<FieldDecl> {
        vec![
            FieldDecl::inline::<GlobalOptions>("global"),
            FieldDecl::flag::<String>("format", "format").alias("o"),
            FieldDecl::flag::<bool>("watch", "watch").alias("w").elide(true),
        ]
    }

    fn field_mut(&mut self, index: usize) -> Option<Slot<'_>> {
        match index {
            0 => Some(Slot::inline(&mut self.global)),
            1 => Some(Slot::value(&mut self.format)),
            2 => Some(Slot::value(&mut self.watch)),
            _ => None,
        }
    }
}

type BindFn = fn(&Decoder, &ParamSpec, &RuleSet) -> Result<Value, String>;

/// One demo command: where it lives, what it binds into.
pub struct CommandDef {
    pub target: &'static [&'static str],
    pub about: &'static str,
    pub spec: fn() -> Result<Arc<ParamSpec>, SpecError>,
    pub bind: BindFn,
}

pub static COMMANDS: &[CommandDef] = &[
    CommandDef {
        target: &["deploy"],
        about: "Roll services out to an environment",
        spec: spec_of::<DeployParams>,
        bind: bind::<DeployParams>,
    },
    CommandDef {
        target: &["deploy", "rollback"],
        about: "Return services to an earlier revision",
        spec: spec_of::<RollbackParams>,
        bind: bind::<RollbackParams>,
    },
    CommandDef {
        target: &["status"],
        about: "Show deployment state",
        spec: spec_of::<StatusParams>,
        bind: bind::<StatusParams>,
    },
];

pub fn find(target: &[String]) -> Option<&'static CommandDef> {
    COMMANDS
        .iter()
        .find(|def| def.target.iter().copied().eq(target.iter().map(String::as_str)))
}

fn bind<T: Params + Serialize>(
    decoder: &Decoder,
    spec: &ParamSpec,
    rules: &RuleSet,
) -> Result<Value, String> {
    let mut params = T::default();
    decoder
        .decode_spec(spec, &mut params)
        .map_err(|err| err.to_string())?;
    rules.process_spec(spec, &mut params).map_err(|err| err.to_string())?;
    serde_json::to_value(&params).map_err(|err| format!("Failed to serialize params: {err}"))
}

/// Registers every demo command, with its description as info.
pub fn registry(config: ExecConfig) -> Result<CommandSpecs, ExecError> {
    let mut specs = CommandSpecs::with_config(config);
    for def in COMMANDS {
        specs.register_exec(def.target, (def.spec)()?)?;
        specs.register_info(def.target, Arc::new(def.about))?;
    }
    Ok(specs)
}

/// Defaults and checks applied after decoding.
pub fn install_rules(rules: &mut RuleSet) {
    rules.add(|global: &mut GlobalOptions| {
        if global.config.is_none() {
            global.config = Some(PathBuf::from("deploy.toml"));
        }
    });

    rules.add(|deploy: &mut DeployParams| {
        if deploy.environment.is_empty() {
            deploy.environment = "staging".to_string();
        }
        if deploy.replicas == 0 {
            deploy.replicas = 1;
        }
    });
    rules.add_fallible(|deploy: &mut DeployParams| {
        if deploy.environment == "production" && !deploy.dry_run && deploy.services.is_empty() {
            return Err("production deploys must name their services".into());
        }
        Ok(())
    });

    rules.add(|status: &mut StatusParams| {
        if status.format.is_empty() {
            status.format = "text".to_string();
        }
    });
}

/// Description registered for `target`.
pub fn about(specs: &CommandSpecs, target: &[&str]) -> Option<&'static str> {
    specs
        .info(target)
        .and_then(|info| info.downcast_ref::<&'static str>())
        .copied()
}
