// Run with: mpirun -n 4 cargo run --features mpi-support --example mpi_assembly
use dist_assembly::prelude::*;
use dist_assembly::algs::vec_reduce::{dot_begin, dot_end, norm_begin, norm_end};

fn main() -> Result<(), AssemblyError> {
    let comm = MpiComm::new()?;
    let rank = comm.rank();
    let size = comm.size();
    let group = ProcessGroup::new(comm.clone());

    // every rank adds 1.0 to every global entry
    let opts = StashOptions::from_env();
    let mut x = DistVec::from_local_size(comm, 5, 1, &opts)?;
    let all: Vec<i64> = (0..x.global_len() as i64).collect();
    x.set_values(&all, &vec![1.0; all.len()], InsertMode::Accumulate)?;
    x.assembly_begin()?;
    x.assembly_end()?;
    assert!(x.local().iter().all(|&v| v == size as f64));

    let reg = group.split_reduction();
    let d = dot_begin(&reg, &x, &x)?;
    let inf = norm_begin(&reg, &x, NormType::Max)?;
    let dot = dot_end(&reg, d)?;
    let max = norm_end(&reg, inf, NormType::Max)?.value();
    if rank == 0 {
        println!(
            "[rank 0] {size} ranks: x.x = {dot}, |x|_max = {max}, stash info {:?}",
            x.stash_info()
        );
    }
    Ok(())
}
