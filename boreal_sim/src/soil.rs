// ICBM/2N soil carbon and nitrogen dynamics.
//
// Implementation of the ICBM/2N model (Kaetterer & Andren 2001): two
// "young" pools (labile: foliage and fine-root litter; refractory: woody
// debris) and one old soil-organic-matter pool, each as carbon/nitrogen,
// advanced by an annual analytical solution. Inputs arrive from the snag
// dynamics; the climate factor `re` scales all decomposition rates.
//
// Pool sizes are stored in t/ha internally; the external interface (inputs
// and plant-available nitrogen) is kg/ha, matching the snag layer.

use crate::config::SoilSettingsConfig;
use crate::error::SimError;
use crate::snag::{CnPair, CnPool};

/// State and parameters of the soil column of one resource unit.
#[derive(Clone, Debug)]
pub struct Soil {
    // ICBM/2N parameters
    /// Microbial C/N ratio.
    qb: f64,
    /// SOM C/N ratio.
    qh: f64,
    /// Fraction of SOM-mineralized N leached away.
    leaching: f64,
    /// Microbial efficiency, labile pool.
    el: f64,
    /// Microbial efficiency, refractory pool.
    er: f64,
    /// Humification fraction.
    h: f64,
    /// SOM decomposition rate (1/yr).
    ko: f64,
    /// Decomposition rate of the young labile pool.
    kyl: f64,
    /// Decomposition rate of the young refractory pool.
    kyr: f64,

    // state (t/ha)
    young_labile: CnPair,
    young_refractory: CnPair,
    som: CnPair,

    // inputs of the current year (t/ha)
    input_labile: CnPair,
    input_labile_cn: f64,
    input_refractory: CnPair,
    input_refractory_cn: f64,

    /// Climate factor scaling decomposition this year.
    re: f64,
    /// Plant-available nitrogen (kg/ha/yr).
    available_nitrogen: f64,
}

impl Soil {
    /// Set up from the global soil settings, per-site rates and initial
    /// pool contents (kg/ha).
    #[allow(clippy::too_many_arguments)]
    pub fn setup(
        settings: &SoilSettingsConfig,
        ko: f64,
        h: f64,
        young_labile_kg_ha: CnPool,
        young_refractory_kg_ha: CnPool,
        som_kg_ha: CnPair,
        initial_available_nitrogen: f64,
    ) -> Result<Self, SimError> {
        let kyl = young_labile_kg_ha.parameter;
        let kyr = young_refractory_kg_ha.parameter;
        if kyl <= 0.0 || kyr <= 0.0 {
            return Err(SimError::Soil(format!("invalid decomposition rates kyl={kyl} kyr={kyr}")));
        }
        let young_labile = young_labile_kg_ha.pair().scaled(0.001);
        let young_refractory = young_refractory_kg_ha.pair().scaled(0.001);
        let som = som_kg_ha.scaled(0.001);
        for (name, pool) in
            [("yl", &young_labile), ("yr", &young_refractory), ("som", &som)]
        {
            if !pool.is_valid() {
                return Err(SimError::Soil(format!(
                    "invalid {name} pool: c={} n={}",
                    pool.c, pool.n
                )));
            }
        }
        if ko <= 0.0 || h <= 0.0 {
            return Err(SimError::Soil(format!("invalid rates ko={ko} h={h}")));
        }
        Ok(Self {
            qb: settings.qb,
            qh: settings.qh,
            leaching: settings.leaching,
            el: settings.el,
            er: settings.er,
            h,
            ko,
            kyl,
            kyr,
            young_labile,
            young_refractory,
            som,
            input_labile: CnPair::default(),
            input_labile_cn: 0.0,
            input_refractory: CnPair::default(),
            input_refractory_cn: 0.0,
            re: 0.0,
            available_nitrogen: initial_available_nitrogen,
        })
    }

    pub fn young_labile(&self) -> &CnPair {
        &self.young_labile
    }

    pub fn young_refractory(&self) -> &CnPair {
        &self.young_refractory
    }

    pub fn som(&self) -> &CnPair {
        &self.som
    }

    /// Total soil carbon (t/ha).
    pub fn total_c(&self) -> f64 {
        self.young_labile.c + self.young_refractory.c + self.som.c
    }

    pub fn available_nitrogen(&self) -> f64 {
        self.available_nitrogen
    }

    pub fn set_climate_factor(&mut self, re: f64) {
        self.re = re;
    }

    /// Set this year's litter/deadwood inputs (kg/ha). The pool
    /// decomposition rates are updated as input-weighted means.
    pub fn set_soil_input(&mut self, labile: CnPool, refractory: CnPool) {
        self.input_labile = labile.pair().scaled(0.001);
        self.input_labile_cn = labile.cn();
        self.input_refractory = refractory.pair().scaled(0.001);
        self.input_refractory_cn = refractory.cn();
        // merge input rates into the pool rates, weighted by carbon
        let wl = self.young_labile.c + self.input_labile.c;
        if wl > 0.0 && labile.parameter > 0.0 {
            self.kyl = (self.kyl * self.young_labile.c + labile.parameter * self.input_labile.c)
                / wl;
        }
        let wr = self.young_refractory.c + self.input_refractory.c;
        if wr > 0.0 && refractory.parameter > 0.0 {
            self.kyr = (self.kyr * self.young_refractory.c
                + refractory.parameter * self.input_refractory.c)
                / wr;
        }
    }

    /// Annual update; must run after the snag dynamics so the inputs of
    /// the year are present.
    pub fn calculate_year(&mut self) -> Result<(), SimError> {
        if self.re == 0.0 {
            return Err(SimError::Soil("invalid value for 're' (0.)".into()));
        }
        let t = 1.0; // annual timestep
        let (el, er, h, qb, qh) = (self.el, self.er, self.h, self.qb, self.qh);
        let (kyl, kyr, ko, re) = (self.kyl, self.kyr, self.ko, self.re);

        let total_in = CnPair::new(
            self.input_labile.c + self.input_refractory.c,
            self.input_labile.n + self.input_refractory.n,
        );

        let ylss = self.input_labile.c / (kyl * re); // Yl steady-state C
        let cl = el * (1.0 - h) / qb - h * (1.0 - el) / qh; // eta l
        let ynlss = if self.input_labile.is_empty() || self.input_labile_cn <= 0.0 {
            0.0
        } else {
            self.input_labile.c / (kyl * re * (1.0 - h))
                * ((1.0 - el) / self.input_labile_cn + cl)
        };

        let yrss = self.input_refractory.c / (kyr * re); // Yr steady-state C
        let cr = er * (1.0 - h) / qb - h * (1.0 - er) / qh; // eta r
        let ynrss = if self.input_refractory.is_empty() || self.input_refractory_cn <= 0.0 {
            0.0
        } else {
            self.input_refractory.c / (kyr * re * (1.0 - h))
                * ((1.0 - er) / self.input_refractory_cn + cr)
        };

        let oss = h * total_in.c / (ko * re); // O steady-state C
        let onss = h * total_in.c / (qh * ko * re); // O steady-state N

        let al = h * (kyl * re * self.young_labile.c - self.input_labile.c) / ((ko - kyl) * re);
        let ar =
            h * (kyr * re * self.young_refractory.c - self.input_refractory.c) / ((ko - kyr) * re);

        let lfactor = (-kyl * re * t).exp();
        let rfactor = (-kyr * re * t).exp();

        // young labile pool
        let yl = self.young_labile;
        self.young_labile.c = ylss + (yl.c - ylss) * lfactor;
        self.young_labile.n = ynlss
            + (yl.n - ynlss - cl / (el - h) * (yl.c - ylss))
                * (-kyl * re * (1.0 - h) * t / (1.0 - el)).exp()
            + cl / (el - h) * (yl.c - ylss) * lfactor;

        // young refractory pool
        let yr = self.young_refractory;
        self.young_refractory.c = yrss + (yr.c - yrss) * rfactor;
        self.young_refractory.n = ynrss
            + (yr.n - ynrss - cr / (er - h) * (yr.c - yrss))
                * (-kyr * re * (1.0 - h) * t / (1.0 - er)).exp()
            + cr / (er - h) * (yr.c - yrss) * rfactor;

        // SOM pool
        let o = self.som;
        self.som.c = oss + (o.c - oss - al - ar) * (-ko * re * t).exp()
            + al * lfactor
            + ar * rfactor;
        self.som.n = onss + (o.n - onss - (al + ar) / qh) * (-ko * re * t).exp()
            + al / qh * lfactor
            + ar / qh * rfactor;

        // plant-available nitrogen (kg/ha)
        let mut nav = kyl * re * (1.0 - h) / (1.0 - el)
            * (self.young_labile.n - el * self.young_labile.c / qb);
        nav += kyr * re * (1.0 - h) / (1.0 - er)
            * (self.young_refractory.n - er * self.young_refractory.c / qb);
        nav += ko * re * self.som.n * (1.0 - self.leaching);
        self.available_nitrogen = (nav * 1000.0).max(0.0);

        if !self.total_c().is_finite() || self.total_c() < 0.0 {
            return Err(SimError::Soil(format!(
                "pools left the valid range after integration (total C = {})",
                self.total_c()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_soil() -> Soil {
        Soil::setup(
            &SoilSettingsConfig::default(),
            0.02,
            0.3,
            CnPool::new(12_000.0, 500.0, 0.25),
            CnPool::new(18_000.0, 250.0, 0.1),
            CnPair::new(60_000.0, 2_500.0),
            70.0,
        )
        .unwrap()
    }

    #[test]
    fn setup_rejects_invalid_rates() {
        let err = Soil::setup(
            &SoilSettingsConfig::default(),
            0.02,
            0.3,
            CnPool::new(1000.0, 50.0, 0.0), // kyl = 0
            CnPool::new(1000.0, 20.0, 0.1),
            CnPair::new(1000.0, 50.0),
            70.0,
        );
        assert!(matches!(err, Err(SimError::Soil(_))));
    }

    #[test]
    fn zero_climate_factor_is_an_error() {
        let mut soil = default_soil();
        assert!(soil.calculate_year().is_err());
    }

    #[test]
    fn pools_decay_without_input() {
        let mut soil = default_soil();
        soil.set_climate_factor(1.0);
        soil.set_soil_input(CnPool::default(), CnPool::default());
        let c0 = soil.total_c();
        for _ in 0..10 {
            soil.calculate_year().unwrap();
        }
        assert!(soil.total_c() < c0);
        assert!(soil.young_labile().c >= 0.0);
    }

    #[test]
    fn constant_input_converges_to_steady_state() {
        // invariant 6: with constant inputs and re, iteration converges to
        // the analytical steady state
        let mut soil = Soil::setup(
            &SoilSettingsConfig::default(),
            0.02,
            0.3,
            CnPool::new(0.0, 0.0, 0.25),
            CnPool::new(0.0, 0.0, 0.1),
            CnPair::new(0.0, 0.0),
            70.0,
        )
        .unwrap();
        let re = 1.0;
        soil.set_climate_factor(re);
        let input_l = CnPool::new(1500.0, 50.0, 0.25);
        let input_r = CnPool::new(2000.0, 25.0, 0.1);
        for _ in 0..10_000 {
            soil.set_soil_input(input_l, input_r);
            soil.calculate_year().unwrap();
        }
        let ylss = 1.5 / (0.25 * re);
        let yrss = 2.0 / (0.1 * re);
        let oss = 0.3 * (1.5 + 2.0) / (0.02 * re);
        assert!((soil.young_labile().c - ylss).abs() < 1e-6, "{}", soil.young_labile().c);
        assert!((soil.young_refractory().c - yrss).abs() < 1e-6);
        assert!((soil.som().c - oss).abs() < 1e-6, "{} vs {}", soil.som().c, oss);
        assert!(soil.available_nitrogen() > 0.0);
    }

    #[test]
    fn nitrogen_never_negative() {
        let mut soil = Soil::setup(
            &SoilSettingsConfig::default(),
            0.02,
            0.3,
            CnPool::new(100.0, 0.1, 0.25),
            CnPool::new(100.0, 0.1, 0.1),
            CnPair::new(100.0, 0.1),
            70.0,
        )
        .unwrap();
        soil.set_climate_factor(0.5);
        soil.set_soil_input(CnPool::new(10.0, 0.01, 0.25), CnPool::new(10.0, 0.01, 0.1));
        soil.calculate_year().unwrap();
        assert!(soil.available_nitrogen() >= 0.0);
    }
}
