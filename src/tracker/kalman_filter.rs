use nalgebra::SMatrix;

/* -----------------------------------------------------------------------------
 * Type aliases
 * ----------------------------------------------------------------------------- */
// 1x4: [cx, cy, h, r]
pub(crate) type Measurement = SMatrix<f32, 1, 4>;
// 1x8: measurement followed by its per-frame velocities
pub(crate) type StateMean = SMatrix<f32, 1, 8>;
// 8x8
pub(crate) type StateCov = SMatrix<f32, 8, 8>;
// 1x4
pub(crate) type StateHMean = SMatrix<f32, 1, 4>;
// 4x4
pub(crate) type StateHCov = SMatrix<f32, 4, 4>;

/* -----------------------------------------------------------------------------
 * Noise model
 * ----------------------------------------------------------------------------- */
const INIT_POSITION_VAR: f32 = 10.0;
const INIT_VELOCITY_VAR: f32 = 10_000.0;
const PROCESS_VELOCITY_VAR: f32 = 0.01;
const MEASUREMENT_VAR: [f32; 4] = [1.0, 1.0, 10.0, 0.01];

fn init_state_cov() -> StateCov {
    let mut p = StateCov::identity() * INIT_POSITION_VAR;
    for i in 4..8 {
        p[(i, i)] = INIT_VELOCITY_VAR;
    }
    p
}

fn process_noise() -> StateCov {
    let mut q = StateCov::identity();
    for i in 4..8 {
        q[(i, i)] = PROCESS_VELOCITY_VAR;
    }
    q
}

fn measurement_noise() -> StateHCov {
    StateHCov::from_diagonal(
        &SMatrix::<f32, 1, 4>::from_iterator(MEASUREMENT_VAR).transpose(),
    )
}

/* -----------------------------------------------------------------------------
 * Kalman Filter
 * ----------------------------------------------------------------------------- */
/// Constant-velocity filter over a box in `[cx, cy, h, r]` form.
#[derive(Debug, Clone)]
pub(crate) struct KalmanFilter {
    motion_mat: StateCov,
    update_mat: SMatrix<f32, 4, 8>,
    x: StateMean,
    covariance: StateCov,
}

impl KalmanFilter {
    pub(crate) fn new(z: &Measurement) -> Self {
        let mut motion_mat = StateCov::identity();
        for i in 0..4 {
            motion_mat[(i, i + 4)] = 1.0;
        }

        let mut update_mat = SMatrix::<f32, 4, 8>::zeros();
        for i in 0..4 {
            update_mat[(i, i)] = 1.0;
        }

        let mut x = StateMean::zeros();
        x.as_mut_slice()[0..4].copy_from_slice(z.as_slice());

        Self {
            motion_mat,
            update_mat,
            x,
            covariance: init_state_cov(),
        }
    }

    pub(crate) fn predict(&mut self) -> (StateMean, StateCov) {
        self.x = (self.motion_mat * self.x.transpose()).transpose();
        self.covariance = self.motion_mat
            * self.covariance
            * self.motion_mat.transpose()
            + process_noise();

        (self.x, self.covariance)
    }

    pub(crate) fn project(&self) -> (StateHMean, StateHCov) {
        let mean = self.x * self.update_mat.transpose();
        let covariance =
            self.update_mat * self.covariance * self.update_mat.transpose();

        (mean, covariance + measurement_noise())
    }

    /// Fold a measurement into the state.
    ///
    /// When the innovation covariance is not positive definite the state is
    /// reset onto the measurement instead.
    pub(crate) fn update(&mut self, measurement: &Measurement) -> (StateMean, StateCov) {
        let (projected_mean, projected_cov) = self.project();

        let Some(cholesky) = projected_cov.cholesky() else {
            *self = Self::new(measurement);
            return (self.x, self.covariance);
        };

        // gain_t = S^-1 (H P), i.e. the transposed Kalman gain (4x8)
        let gain_t = cholesky
            .solve(&(self.covariance * self.update_mat.transpose()).transpose());
        let innovation = measurement - projected_mean;
        self.x += innovation * gain_t;

        // Joseph form keeps the covariance symmetric in f32.
        let gain = gain_t.transpose();
        let i_minus_kh = StateCov::identity() - gain * self.update_mat;
        self.covariance = i_minus_kh * self.covariance * i_minus_kh.transpose()
            + gain * measurement_noise() * gain.transpose();

        (self.x, self.covariance)
    }

    /// Zero the height velocity so unobserved boxes keep their size.
    pub(crate) fn freeze_height_velocity(&mut self) {
        self.x[(0, 6)] = 0.0;
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &StateMean {
        &self.x
    }

    #[cfg(test)]
    pub(crate) fn covariance(&self) -> &StateCov {
        &self.covariance
    }
}
