//! Preconditioner factory for sparse velocity-block solves.

use crate::config::{MgOptions, PcType};
use crate::error::StokesError;
use crate::matrix::CsrMatrix;
use crate::preconditioner::{Amg, Identity, Jacobi, Preconditioner, SharedSchedule, Sor};

/// Build and set up the preconditioner selected by `pc_type` for `a`.
///
/// `schedule` is only consulted for `PcType::Multigrid`; it makes the cycle
/// follow an adaptive smoothing count instead of `mg.nu_pre`/`mg.nu_post`.
pub fn build_preconditioner(
    pc_type: PcType,
    a: &CsrMatrix,
    mg: &MgOptions,
    schedule: Option<SharedSchedule>,
) -> Result<Box<dyn Preconditioner>, StokesError> {
    let mut pc: Box<dyn Preconditioner> = match pc_type {
        PcType::None => Box::new(Identity),
        PcType::Jacobi => Box::new(Jacobi::new()),
        PcType::Sor => Box::new(Sor::ssor(mg.sor_omega)),
        PcType::Multigrid => {
            let amg = Amg::new(mg.clone());
            match schedule {
                Some(s) => Box::new(amg.with_schedule(s)),
                None => Box::new(amg),
            }
        }
    };
    pc.setup(a)?;
    Ok(pc)
}
