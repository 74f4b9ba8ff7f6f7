use crate::errors::{EngineError, EngineResult};
use crate::models::{validate_sigmas, validate_strikes, PricingModel};
use crate::types::{ExerciseStyle, MarketInputs, ModelKind, OptionKind};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};

/// Cox-Ross-Rubinstein binomial lattice, vectorized across strikes.
///
/// u = exp(sigma * sqrt(dt)), d = 1/u, p = (exp((r - q) * dt) - d) / (u - d)
///
/// Every strike carries its own sigma, so u/d/p are row vectors over the
/// strikes dimension. The lattice is a (steps + 1) x strikes array and
/// backward induction is slice arithmetic over whole levels.
#[derive(Debug, Clone, Copy)]
pub struct BinomialTree {
    pub steps: usize,
    pub style: ExerciseStyle,
}

impl BinomialTree {
    pub fn new(steps: usize, style: ExerciseStyle) -> EngineResult<Self> {
        check_steps(steps)?;
        Ok(Self { steps, style })
    }
}

impl PricingModel for BinomialTree {
    #[inline]
    fn kind(&self) -> ModelKind {
        ModelKind::Binomial
    }

    fn price(
        &self,
        market: &MarketInputs,
        strikes: &[f64],
        sigmas: &[f64],
        kind: OptionKind,
    ) -> EngineResult<Vec<f64>> {
        check_steps(self.steps)?;
        market.validate()?;
        validate_strikes(strikes)?;
        validate_sigmas(strikes, sigmas)?;

        let american = self.style.is_american();
        let t = market.tau();
        let dt = t / self.steps as f64;
        let drift_step = ((market.rate - market.dividend_yield) * dt).abs();
        let mut out = vec![0.0; strikes.len()];

        // Strikes with no time value skip the lattice entirely. So do strikes whose
        // per-step volatility is below the per-step drift: p would leave [0, 1], and
        // at the boundary the lattice collapses onto the forward path anyway.
        let mut live: Vec<usize> = Vec::with_capacity(strikes.len());
        for (i, (&k, &sigma)) in strikes.iter().zip(sigmas).enumerate() {
            if t <= 0.0 || sigma <= 0.0 || sigma * dt.sqrt() < drift_step {
                out[i] = degenerate_price(market, kind, k, american);
            } else {
                live.push(i);
            }
        }

        if live.is_empty() {
            return Ok(out);
        }

        let live_strikes = Array1::from_iter(live.iter().map(|&i| strikes[i]));
        let live_sigmas = Array1::from_iter(live.iter().map(|&i| sigmas[i]));
        let prices = roll_back(
            market,
            live_strikes.view(),
            live_sigmas.view(),
            self.steps,
            kind,
            american,
        );

        for (&i, &px) in live.iter().zip(prices.iter()) {
            out[i] = px.max(0.0);
        }
        Ok(out)
    }
}

/// Free-function form: price(S, strikes[], T, r, sigma[], steps, kind, american, q).
#[allow(clippy::too_many_arguments)]
pub fn binomial_tree_price(
    spot: f64,
    strikes: &[f64],
    expiry_years: f64,
    rate: f64,
    sigmas: &[f64],
    steps: usize,
    kind: OptionKind,
    american: bool,
    dividend_yield: f64,
) -> EngineResult<Vec<f64>> {
    let tree = BinomialTree::new(steps, ExerciseStyle::from_american(american))?;
    let market = MarketInputs {
        spot,
        expiry_years,
        rate,
        dividend_yield,
    };
    tree.price(&market, strikes, sigmas, kind)
}

fn check_steps(steps: usize) -> EngineResult<()> {
    if steps < 1 {
        return Err(EngineError::config("binomial steps must be >= 1"));
    }
    Ok(())
}

/// sigma <= 0, T <= 0, or sigma too small for the step drift: no lattice.
/// European collapses to the discounted forward intrinsic; American may also
/// exercise immediately at spot.
#[inline]
fn degenerate_price(market: &MarketInputs, kind: OptionKind, strike: f64, american: bool) -> f64 {
    let european = market.discounted_intrinsic(kind, strike);
    if american {
        european.max(kind.intrinsic(market.spot, strike))
    } else {
        european
    }
}

fn roll_back(
    market: &MarketInputs,
    strikes: ArrayView1<f64>,
    sigmas: ArrayView1<f64>,
    steps: usize,
    kind: OptionKind,
    american: bool,
) -> Array1<f64> {
    let dt = market.tau() / steps as f64;
    let sign = kind.sign();

    let vol_step = sigmas.mapv(|sigma| sigma * dt.sqrt());
    let up = vol_step.mapv(f64::exp);
    let down = up.mapv(|u| 1.0 / u);
    let growth = ((market.rate - market.dividend_yield) * dt).exp();
    // Callers route strikes with sigma * sqrt(dt) < |r - q| * dt to the degenerate path.
    let p = ((growth - &down) / (&up - &down)).mapv(|p| p.clamp(0.0, 1.0));

    let disc = (-market.rate * dt).exp();
    let disc_p = (&p * disc).insert_axis(Axis(0));
    let disc_q = p.mapv(|p| (1.0 - p) * disc).insert_axis(Axis(0));

    let vol_row = vol_step.view().insert_axis(Axis(0));
    let strike_row = strikes.insert_axis(Axis(0));

    // Terminal level: node j has j up-moves, S_T = S * exp((2j - steps) * sigma * sqrt(dt)).
    let terminal = level_exponents(steps);
    let mut values = node_payoffs(market.spot, terminal.view(), vol_row, strike_row, sign);

    for level in (0..steps).rev() {
        let up_child = values.slice(s![1..=level + 1, ..]);
        let down_child = values.slice(s![0..=level, ..]);
        let mut continuation = &up_child * &disc_p + &down_child * &disc_q;

        if american {
            let exponents = level_exponents(level);
            let exercise =
                node_payoffs(market.spot, exponents.view(), vol_row, strike_row, sign);
            Zip::from(&mut continuation)
                .and(&exercise)
                .for_each(|c, &e| *c = (*c).max(e));
        }

        values = continuation;
    }

    values.row(0).to_owned()
}

/// (2j - level) for j in 0..=level.
#[inline]
fn level_exponents(level: usize) -> Array1<f64> {
    let level = level as i64;
    Array1::from_iter((0..=level).map(|j| (2 * j - level) as f64))
}

/// Intrinsic value at every node of one level, for every strike.
fn node_payoffs(
    spot: f64,
    exponents: ArrayView1<f64>,
    vol_row: ArrayView2<f64>,
    strike_row: ArrayView2<f64>,
    sign: f64,
) -> Array2<f64> {
    let col = exponents.insert_axis(Axis(1));
    let mut asset = &col * &vol_row;
    asset.mapv_inplace(|x| spot * x.exp());
    let mut payoff = &asset - &strike_row;
    payoff.mapv_inplace(|x| (sign * x).max(0.0));
    payoff
}
