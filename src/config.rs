use crate::errors::{EngineError, EngineResult};
use crate::factor::composite::CompositeWeights;
use crate::models::binomial::BinomialTree;
use crate::models::black_scholes::BlackScholes;
use crate::models::PricingModel;
use crate::types::{ExerciseStyle, FactorKind, ModelKind, OptionKind, VolatilityInput};
use chrono::NaiveDate;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_STEPS: usize = 50;
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Everything one pricing pass needs besides market data.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingParams {
    pub rate: f64,
    /// None means "ask the provider".
    pub dividend_yield: Option<f64>,
    pub steps: usize,
    pub american: bool,
    pub model: ModelKind,
    /// A `PerStrike` array lines up with each chain side as listed. A composite
    /// pass applies the same array to calls and puts, so both sides must list
    /// the same number of strikes or the pass is a configuration error.
    pub volatility: VolatilityInput,
    /// Keep strikes in [low * spot, high * spot].
    pub moneyness: Option<(f64, f64)>,
}

impl Default for PricingParams {
    fn default() -> Self {
        Self {
            rate: 0.0,
            dividend_yield: None,
            steps: DEFAULT_STEPS,
            american: true,
            model: ModelKind::Binomial,
            volatility: VolatilityInput::Unresolved,
            moneyness: None,
        }
    }
}

impl PricingParams {
    pub fn style(&self) -> ExerciseStyle {
        ExerciseStyle::from_american(self.american)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !self.rate.is_finite() {
            return Err(EngineError::config(format!("rate must be finite, got {}", self.rate)));
        }
        if let Some(q) = self.dividend_yield {
            if !q.is_finite() {
                return Err(EngineError::config(format!("dividend yield must be finite, got {q}")));
            }
        }
        if self.steps < 1 {
            return Err(EngineError::config("steps must be >= 1"));
        }
        if self.model == ModelKind::BlackScholes && self.american {
            return Err(EngineError::config(
                "Black-Scholes is European only; use the binomial model for American exercise",
            ));
        }
        if let VolatilityInput::Flat(sigma) = self.volatility {
            if sigma.is_nan() {
                return Err(EngineError::config("flat volatility is NaN"));
            }
        }
        if let Some((low, high)) = self.moneyness {
            if !(low.is_finite() && high.is_finite() && low > 0.0 && low <= high) {
                return Err(EngineError::config(format!(
                    "moneyness band must satisfy 0 < low <= high, got [{low}, {high}]"
                )));
            }
        }
        Ok(())
    }

    /// The pricing engine these params select.
    pub fn engine(&self) -> EngineResult<Box<dyn PricingModel>> {
        self.validate()?;
        Ok(match self.model {
            ModelKind::Binomial => Box::new(BinomialTree::new(self.steps, self.style())?),
            ModelKind::BlackScholes => Box::new(BlackScholes::new()),
        })
    }
}

/// A date-range factor computation for one symbol (or, in a batch, for each ticker).
#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    pub expiry: NaiveDate,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub factor: FactorKind,
    pub weights: CompositeWeights,
    pub pricing: PricingParams,
}

impl ScanConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.end < self.start {
            return Err(EngineError::config(format!(
                "end date {} is before start date {}",
                self.end, self.start
            )));
        }
        self.pricing.validate()
    }
}

/// What the binary does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Tree,
    BlackScholes,
    Call,
    Put,
    Composite,
    Range,
    Batch,
}

impl FromStr for Mode {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tree" => Ok(Self::Tree),
            "bs" | "black_scholes" => Ok(Self::BlackScholes),
            "call" => Ok(Self::Call),
            "put" => Ok(Self::Put),
            "composite" => Ok(Self::Composite),
            "range" => Ok(Self::Range),
            "batch" => Ok(Self::Batch),
            other => Err(EngineError::config(format!("unknown mode '{other}'"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mode: Mode,
    pub symbol: Option<String>,
    pub tickers: Vec<String>,
    pub expiry: Option<NaiveDate>,
    pub valuation_date: NaiveDate,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub factor: FactorKind,
    /// Side priced in tree/bs modes.
    pub option_kind: Option<OptionKind>,
    pub pricing: PricingParams,
    pub weights: CompositeWeights,
    pub max_workers: usize,
    pub spot: Option<f64>,
    pub strikes: Vec<f64>,
    pub expiry_years: Option<f64>,
    pub data_dir: PathBuf,
    pub output_path: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> EngineResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source. `from_env` is this over the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> EngineResult<Self> {
        let env = Env { lookup: &lookup };

        let mode: Mode = env.parse_or("MODE", Mode::Composite)?;
        let model: ModelKind = env.parse_or("MODEL", ModelKind::Binomial)?;
        // Black-Scholes pricing is European unless told otherwise (which then fails validation)
        let american = env.parse_or("AMERICAN", model == ModelKind::Binomial)?;

        let valuation_date = match env.parse::<NaiveDate>("VALUATION_DATE")? {
            Some(d) => d,
            None => chrono::Local::now().date_naive(),
        };
        let start_date = env.parse_or("START_DATE", valuation_date)?;
        let end_date = env.parse_or("END_DATE", valuation_date)?;

        let per_strike = match env.get("SIGMA") {
            Some(raw) if raw.contains(',') => Some(parse_list::<f64>("SIGMA", &raw)?),
            _ => None,
        };
        let flat = if per_strike.is_some() { None } else { env.parse::<f64>("SIGMA")? };

        let moneyness = match (env.parse::<f64>("MONEYNESS_LOW")?, env.parse::<f64>("MONEYNESS_HIGH")?) {
            (Some(low), Some(high)) => Some((low, high)),
            (None, None) => None,
            _ => {
                return Err(EngineError::config(
                    "MONEYNESS_LOW and MONEYNESS_HIGH must be set together",
                ))
            }
        };

        let pricing = PricingParams {
            rate: env.parse_or("RATE", 0.0)?,
            dividend_yield: env.parse("DIVIDEND_YIELD")?,
            steps: env.parse_or("STEPS", DEFAULT_STEPS)?,
            american,
            model,
            volatility: VolatilityInput::from_overrides(flat, per_strike),
            moneyness,
        };

        let weights = CompositeWeights::new(env.parse_or("W_CALL", 0.5)?, env.parse_or("W_PUT", 0.5)?)
            .map_err(|e| EngineError::config(format!("W_CALL/W_PUT: {e}")))?;

        let tickers = match env.get("TICKERS") {
            Some(raw) => parse_list::<String>("TICKERS", &raw)?,
            None => Vec::new(),
        };
        let strikes = match env.get("STRIKES") {
            Some(raw) => parse_list::<f64>("STRIKES", &raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            mode,
            symbol: env.get("SYMBOL").map(|s| s.trim().to_ascii_uppercase()),
            tickers,
            expiry: env.parse("EXPIRY")?,
            valuation_date,
            start_date,
            end_date,
            factor: env.parse_or("FACTOR", FactorKind::Composite)?,
            option_kind: env.parse("KIND")?,
            pricing,
            weights,
            max_workers: env.parse_or("MAX_WORKERS", DEFAULT_MAX_WORKERS)?,
            spot: env.parse("SPOT")?,
            strikes,
            expiry_years: env.parse("EXPIRY_YEARS")?,
            data_dir: PathBuf::from(env.get("DATA_DIR").unwrap_or_else(|| "data".to_string())),
            output_path: env.get("OUTPUT_PATH").map(PathBuf::from),
            db_path: env.get("DB_PATH").map(PathBuf::from),
        })
    }

    pub fn require_symbol(&self) -> EngineResult<&str> {
        self.symbol
            .as_deref()
            .ok_or_else(|| EngineError::config("missing env var: SYMBOL"))
    }

    pub fn require_expiry(&self) -> EngineResult<NaiveDate> {
        self.expiry.ok_or_else(|| EngineError::config("missing env var: EXPIRY"))
    }

    /// KIND if set, else FACTOR when it names a single side.
    pub fn require_option_kind(&self) -> EngineResult<OptionKind> {
        match (self.option_kind, self.factor) {
            (Some(kind), _) => Ok(kind),
            (None, FactorKind::Call) => Ok(OptionKind::Call),
            (None, FactorKind::Put) => Ok(OptionKind::Put),
            (None, FactorKind::Composite) => Err(EngineError::config(
                "missing env var: KIND (call or put); a composite factor has no single option kind",
            )),
        }
    }

    pub fn scan_config(&self) -> EngineResult<ScanConfig> {
        let cfg = ScanConfig {
            expiry: self.require_expiry()?,
            start: self.start_date,
            end: self.end_date,
            factor: self.factor,
            weights: self.weights,
            pricing: self.pricing.clone(),
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, key: &str) -> EngineResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|raw| {
                raw.trim()
                    .parse::<T>()
                    .map_err(|e| EngineError::config(format!("{key}: {e}")))
            })
            .transpose()
    }

    fn parse_or<T>(&self, key: &str, default: T) -> EngineResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.parse(key)?.unwrap_or(default))
    }
}

fn parse_list<T>(key: &str, raw: &str) -> EngineResult<Vec<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<T>().map_err(|e| EngineError::config(format!("{key}: {e}"))))
        .collect()
}
