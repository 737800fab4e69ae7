//! End-to-end scenarios: vacuum wave transit, single-particle gyromotion,
//! cross-seam charge conservation, Silver-Muller absorption, heavy-patch
//! balancing, periodic particle wrap, and checkpoint determinism.

use larmor_core::SimParams;
use larmor_core::config::Namelist;

use crate::comm::Communicator;
use crate::patch_set::PatchSet;

fn resolve(deck: &str, n_ranks: usize) -> SimParams {
    let deck: Namelist = toml::from_str(deck).unwrap();
    SimParams::resolve(&deck, n_ranks).unwrap()
}

fn step_once(set: &mut PatchSet, comm: &mut Communicator, step: usize) {
    let time_dual = (step as f64 + 0.5) * set.params.timestep;
    set.moving_window(comm, time_dual, step).unwrap();
    set.dynamics(time_dual, step);
    set.exchange_particles(comm).unwrap();
    set.sum_densities(comm).unwrap();
    set.finalize_and_sort_particles(step);
    set.solve_maxwell(comm, time_dual).unwrap();
}

fn single_rank() -> Communicator {
    Communicator::world(1).pop().unwrap()
}

#[test]
fn vacuum_wave_survives_two_box_transits() {
    // 1024 cells, 32 patches, a sine eigenmode of the Yee scheme; after
    // two full transits of the periodic box the wave must superpose onto
    // its initial state up to numerical dispersion.
    let deck = r#"
        [main]
        geometry = "1dcartesian"
        cell_length = [0.1]
        grid_length = [102.4]
        timestep = 0.08
        simulation_time = 204.8
        number_of_patches = [32]
        em_boundary_conditions = [["periodic", "periodic"]]
    "#;
    let params = resolve(deck, 1);
    let mut comm = single_rank();
    let mut set = PatchSet::new(params.clone(), &comm);

    let dx = params.cell_length[0];
    let dt = params.timestep;
    let k = 2.0 * std::f64::consts::PI / params.grid_length[0];
    // exact frequency of the discrete mode
    let omega = 2.0 / dt * ((dt / dx) * (k * dx / 2.0).sin()).asin();

    for patch in &mut set.patches {
        let ov = params.oversize[0] as f64;
        let begin = patch.cell_begin[0] as f64;
        for i in 0..patch.em.ey.dims[0] {
            let x = (begin + i as f64 - ov) * dx;
            *patch.em.ey.at_mut(i, 0, 0) = (k * x).sin();
        }
        // B lives half a step ahead and half a cell below
        for i in 0..patch.em.bz.dims[0] {
            let x = (begin + i as f64 - ov - 0.5) * dx;
            *patch.em.bz.at_mut(i, 0, 0) = (k * x - omega * dt / 2.0).sin();
        }
    }

    let energy_start: f64 = set.patches.iter().map(|p| p.em.field_energy()).sum();

    let n_steps = (204.8 / dt).round() as usize;
    for step in 0..n_steps {
        step_once(&mut set, &mut comm, step);
    }

    // L2 distance to the initial profile over the unique interior nodes
    let mut diff2 = 0.0;
    let mut norm2 = 0.0;
    for patch in &set.patches {
        let ov = params.oversize[0];
        let begin = patch.cell_begin[0] as f64;
        for i in 0..params.n_space[0] {
            let x = (begin + i as f64) * dx;
            let expect = (k * x).sin();
            let got = patch.em.ey.at(i + ov, 0, 0);
            diff2 += (got - expect) * (got - expect);
            norm2 += expect * expect;
        }
    }
    let rel = (diff2 / norm2).sqrt();
    assert!(rel < 1e-3, "dispersion error too large: {rel}");

    let energy_end: f64 = set.patches.iter().map(|p| p.em.field_energy()).sum();
    assert!(
        ((energy_end - energy_start) / energy_start).abs() < 1e-4,
        "vacuum energy drifted: {energy_start} -> {energy_end}"
    );
}

#[test]
fn single_electron_gyrates_back_to_its_start() {
    // uniform Bz, one electron with p_x = 1: after one gyroperiod
    // T = 2 pi gamma the orbit closes to within 1% of the radius.
    let deck = r#"
        [main]
        geometry = "2dcartesian"
        cell_length = [0.25, 0.25]
        grid_length = [8.0, 8.0]
        timestep = 0.004442882938158366
        simulation_time = 8.885765876316732
        number_of_patches = [2, 2]
        em_boundary_conditions = [["periodic", "periodic"], ["periodic", "periodic"]]

        [[species]]
        name = "electrons"
        mass = 1.0
        charge = -1.0
        particles_per_cell = 0
        boundary_conditions = [["periodic", "periodic"], ["periodic", "periodic"]]

        [[external_field]]
        field = "Bz"
        profile = { shape = "constant", value = 1.0 }
    "#;
    let params = resolve(deck, 1);
    let mut comm = single_rank();
    let mut set = PatchSet::new(params.clone(), &comm);

    let start = [4.0, 4.0];
    for patch in &mut set.patches {
        if start[0] >= patch.env.min[0]
            && start[0] < patch.env.max[0]
            && start[1] >= patch.env.min[1]
            && start[1] < patch.env.max[1]
        {
            // tiny weight: the orbit must not feel its own wake
            patch.species[0]
                .particles
                .push_back(&start, [1.0, 0.0, 0.0], 1e-8, -1);
        }
    }
    set.finalize_and_sort_particles(0);

    // one full gyroperiod, T = 2 pi gamma / |q| B
    let gamma = 2.0f64.sqrt();
    let period = 2.0 * std::f64::consts::PI * gamma;
    let n_steps = (period / params.timestep).round() as usize;
    assert_eq!(n_steps, 2000);
    for step in 0..n_steps {
        step_once(&mut set, &mut comm, step);
    }

    let mut found = None;
    for patch in &set.patches {
        let particles = &patch.species[0].particles;
        for i in 0..particles.len() {
            if particles.weight[i] != 0.0 {
                found = Some([particles.position[0][i], particles.position[1][i]]);
            }
        }
    }
    let end = found.expect("particle lost");
    // 1% of the gyroradius (p/qB = 1)
    assert!((end[0] - start[0]).abs() < 0.01, "x drifted: {end:?}");
    assert!((end[1] - start[1]).abs() < 0.01, "y drifted: {end:?}");
}

#[test]
fn deposition_conserves_charge_across_patch_seams() {
    // drho/dt + div J vanishes cell-wise after the additive ghost sum,
    // including the cells straddling patch boundaries.
    let deck = r#"
        [main]
        geometry = "1dcartesian"
        cell_length = [0.1]
        grid_length = [12.8]
        timestep = 0.05
        simulation_time = 1.0
        number_of_patches = [2]
        em_boundary_conditions = [["periodic", "periodic"]]

        [[species]]
        name = "electrons"
        mass = 1.0
        charge = -1.0
        particles_per_cell = 4
        density = { shape = "constant", value = 1.0 }
        thermal_velocity = [0.1, 0.1, 0.1]
        position_initialization = "random"
        boundary_conditions = [["periodic", "periodic"]]

        [[diag_fields]]
        every = 1
        fields = ["Jx", "Rho"]
    "#;
    let params = resolve(deck, 1);
    let mut comm = single_rank();
    let mut set = PatchSet::new(params.clone(), &comm);

    let rho_of = |set: &PatchSet| -> Vec<Vec<f64>> {
        set.patches
            .iter()
            .map(|p| p.em.rho.data().to_vec())
            .collect()
    };

    step_once(&mut set, &mut comm, 0);
    let rho_before = rho_of(&set);
    step_once(&mut set, &mut comm, 1);

    let dt = params.timestep;
    let dx = params.cell_length[0];
    let ov = params.oversize[0];
    let mut j_scale = 0.0f64;
    for p in &set.patches {
        for &v in p.em.jx.data() {
            j_scale = j_scale.max(v.abs());
        }
    }
    for (ipatch, p) in set.patches.iter().enumerate() {
        for i in ov..ov + params.n_space[0] {
            let drho = (p.em.rho.at(i, 0, 0) - rho_before[ipatch][i]) / dt;
            let div = (p.em.jx.at(i + 1, 0, 0) - p.em.jx.at(i, 0, 0)) / dx;
            assert!(
                (drho + div).abs() <= 1e-12 * j_scale.max(1.0),
                "continuity violated in patch {ipatch} cell {i}: {}",
                drho + div
            );
        }
    }
}

#[test]
fn silver_muller_boundary_absorbs_an_outgoing_pulse() {
    // a right-moving Gaussian pulse leaves through xmax; after the flight
    // time plus margin under 1% of the energy remains in the box.
    let deck = r#"
        [main]
        geometry = "1dcartesian"
        cell_length = [0.1]
        grid_length = [51.2]
        timestep = 0.08
        simulation_time = 80.0
        number_of_patches = [8]
        em_boundary_conditions = [["silver-muller", "silver-muller"]]
    "#;
    let params = resolve(deck, 1);
    let mut comm = single_rank();
    let mut set = PatchSet::new(params.clone(), &comm);

    let dx = params.cell_length[0];
    let dt = params.timestep;
    let (x0, sigma) = (10.0, 2.0);
    let pulse = |x: f64, t: f64| (-((x - t - x0) * (x - t - x0)) / (2.0 * sigma * sigma)).exp();
    for patch in &mut set.patches {
        let ov = params.oversize[0] as f64;
        let begin = patch.cell_begin[0] as f64;
        for i in 0..patch.em.ey.dims[0] {
            let x = (begin + i as f64 - ov) * dx;
            *patch.em.ey.at_mut(i, 0, 0) = pulse(x, 0.0);
        }
        for i in 0..patch.em.bz.dims[0] {
            let x = (begin + i as f64 - ov - 0.5) * dx;
            *patch.em.bz.at_mut(i, 0, 0) = pulse(x, dt / 2.0);
        }
    }

    let energy_start: f64 = set.patches.iter().map(|p| p.em.field_energy()).sum();
    // flight time to xmax plus the demanded margin
    let n_steps = ((params.grid_length[0] - x0 + 6.0 * sigma) / dt).ceil() as usize + 10;
    for step in 0..n_steps {
        step_once(&mut set, &mut comm, step);
    }
    let energy_end: f64 = set.patches.iter().map(|p| p.em.field_energy()).sum();
    assert!(
        energy_end < 0.01 * energy_start,
        "residual energy {energy_end:.3e} of {energy_start:.3e}"
    );
}

#[test]
fn heavy_patch_ends_up_alone_on_its_rank() {
    // 64 patches over 4 ranks, one patch overloaded: iterated balance
    // steps confine it to a single-patch rank while the others share the
    // light patches.
    let deck = r#"
        [main]
        geometry = "1dcartesian"
        cell_length = [0.1]
        grid_length = [51.2]
        timestep = 0.05
        simulation_time = 1.0
        number_of_patches = [64]
        em_boundary_conditions = [["periodic", "periodic"]]

        [[species]]
        name = "electrons"
        mass = 1.0
        charge = -1.0
        particles_per_cell = 0
        boundary_conditions = [["periodic", "periodic"]]

        [load_balancing]
        every = 1
        cell_load = 1.0
        initial_balance = false
    "#;
    let heavy = 40u64;
    let comms = Communicator::world(4);
    let deck = deck.to_string();

    std::thread::scope(|scope| {
        for mut comm in comms {
            let deck = deck.clone();
            scope.spawn(move || {
                let params = resolve(&deck, 4);
                let mut set = PatchSet::new(params.clone(), &comm);

                for patch in &mut set.patches {
                    let count = if patch.hindex == heavy { 100_000 } else { 10 };
                    for i in 0..count {
                        let x = patch.env.min[0] + 0.01 + 0.0000007 * i as f64;
                        patch.species[0]
                            .particles
                            .push_back(&[x], [0.0; 3], 1.0, -1);
                    }
                    let env = patch.env;
                    patch.species[0].sort_particles(&env, &params);
                }

                for _ in 0..12 {
                    set.load_balance(&mut comm, 0.0).unwrap();
                }

                let counts = set.owners.patch_count.clone();
                assert_eq!(counts.iter().sum::<usize>(), 64);

                // the rank holding the heavy patch holds nothing else
                let heavy_rank = set.owners.owner_of(heavy);
                assert_eq!(
                    counts[heavy_rank], 1,
                    "heavy patch shares rank {heavy_rank}: {counts:?}"
                );
                // balanced up to the indivisible heavy lump
                assert!(counts.iter().all(|&c| c >= 1));
                let spread = counts.iter().max().unwrap() - counts.iter().min().unwrap();
                assert!(spread <= 63, "count spread {spread}: {counts:?}");

                // no particle was lost in the migrations
                let local: f64 = set
                    .patches
                    .iter()
                    .map(|p| p.species[0].particles.len() as f64)
                    .sum();
                let total = comm.all_reduce_sum(local);
                assert_eq!(total as usize, 100_000 + 63 * 10);

                // every rank owns exactly the curve range of the table
                let first = set.owners.first_of(comm.rank());
                for (i, patch) in set.patches.iter().enumerate() {
                    assert_eq!(patch.hindex, first + i as u64);
                }
            });
        }
    });
}

#[test]
fn periodic_crossing_preserves_particle_properties() {
    let deck = r#"
        [main]
        geometry = "1dcartesian"
        cell_length = [0.1]
        grid_length = [12.8]
        timestep = 0.05
        simulation_time = 1.0
        number_of_patches = [2]
        em_boundary_conditions = [["periodic", "periodic"]]

        [[species]]
        name = "electrons"
        mass = 1.0
        charge = -1.0
        particles_per_cell = 0
        boundary_conditions = [["periodic", "periodic"]]
    "#;
    let params = resolve(deck, 1);
    let mut comm = single_rank();
    let mut set = PatchSet::new(params.clone(), &comm);

    // just inside xmax, moving right: must reappear just inside xmin
    let momentum = [2.1, 0.7, -0.3];
    let gamma = (1.0f64 + 2.1 * 2.1 + 0.7 * 0.7 + 0.3 * 0.3).sqrt();
    let x_start = params.grid_length[0] - 0.001;
    let last = set.patches.len() - 1;
    set.patches[last].species[0]
        .particles
        .push_back(&[x_start], momentum, 2.5, -1);
    set.finalize_and_sort_particles(0);

    step_once(&mut set, &mut comm, 0);

    let particles = &set.patches[0].species[0].particles;
    assert_eq!(particles.len(), 1);
    let expect = x_start + momentum[0] / gamma * params.timestep - params.grid_length[0];
    assert!(
        (particles.position[0][0] - expect).abs() < 1e-12,
        "wrapped to {}",
        particles.position[0][0]
    );
    assert_eq!(particles.momentum[1][0], 0.7);
    assert_eq!(particles.momentum[2][0], -0.3);
    assert_eq!(particles.weight[0], 2.5);
    assert_eq!(particles.charge[0], -1);
}

#[test]
fn ghost_cells_mirror_the_donor_interior_across_ranks() {
    // after a copy exchange every ghost sample equals the matching donor
    // sample on the neighbor, across the rank boundary too.
    let deck = r#"
        [main]
        geometry = "1dcartesian"
        cell_length = [0.1]
        grid_length = [25.6]
        timestep = 0.05
        simulation_time = 1.0
        number_of_patches = [4]
        em_boundary_conditions = [["periodic", "periodic"]]
    "#;
    let comms = Communicator::world(2);
    let deck = deck.to_string();
    std::thread::scope(|scope| {
        for mut comm in comms {
            let deck = deck.clone();
            scope.spawn(move || {
                let params = resolve(&deck, 2);
                let mut set = PatchSet::new(params.clone(), &comm);
                let dx = params.cell_length[0];
                // a globally known linear-plus-sine field
                let f = |x: f64| 0.3 * x + (x * 0.7).sin();
                for patch in &mut set.patches {
                    let ov = params.oversize[0] as f64;
                    let begin = patch.cell_begin[0] as f64;
                    // interior only; ghosts start stale
                    for i in params.oversize[0]..patch.em.ey.dims[0] - params.oversize[0] {
                        let x = (begin + i as f64 - ov) * dx;
                        *patch.em.ey.at_mut(i, 0, 0) = f(x);
                    }
                }

                let sels = vec![crate::sync::FieldSel::Kind(
                    larmor_fields::FieldKind::Ey,
                )];
                let ctx = crate::sync::SyncCtx {
                    params: &params,
                    owners: &set.owners,
                    rank: comm.rank(),
                    first: set.owners.first_of(comm.rank()),
                };
                crate::sync::exchange(&sels, &mut set.patches, &mut comm, &ctx).unwrap();

                let length = params.grid_length[0];
                for patch in &set.patches {
                    let ov = params.oversize[0];
                    let begin = patch.cell_begin[0] as f64;
                    let dims = patch.em.ey.dims[0];
                    for i in (0..ov).chain(dims - ov..dims) {
                        let mut x = (begin + i as f64 - ov as f64) * dx;
                        // ghosts beyond the seam wrap around the box
                        if x < 0.0 {
                            x += length;
                        }
                        if x >= length {
                            x -= length;
                        }
                        let got = patch.em.ey.at(i, 0, 0);
                        assert!(
                            (got - f(x)).abs() < 1e-12,
                            "ghost {i} of patch {} holds {got}, donor {}",
                            patch.hindex,
                            f(x)
                        );
                    }
                }
            });
        }
    });
}

#[test]
fn restored_checkpoint_reproduces_the_run() {
    let deck = r#"
        [main]
        geometry = "1dcartesian"
        cell_length = [0.1]
        grid_length = [12.8]
        timestep = 0.05
        simulation_time = 1.0
        number_of_patches = [2]
        em_boundary_conditions = [["periodic", "periodic"]]
        random_seed = 9

        [[species]]
        name = "electrons"
        mass = 1.0
        charge = -1.0
        particles_per_cell = 4
        density = { shape = "constant", value = 0.5 }
        thermal_velocity = [0.05, 0.05, 0.05]
        boundary_conditions = [["periodic", "periodic"]]
    "#;
    let params = resolve(deck, 1);
    let mut comm = single_rank();
    let mut set = PatchSet::new(params.clone(), &comm);
    for step in 0..3 {
        step_once(&mut set, &mut comm, step);
    }

    // dump-and-restore mid-run
    let blob = bincode::serialize(&set.patches).unwrap();
    let patches: Vec<crate::patch::Patch> = bincode::deserialize(&blob).unwrap();
    let mut restored = PatchSet::from_restart(params.clone(), set.owners.clone(), patches, 0);
    for patch in &mut restored.patches {
        for sp in &mut patch.species {
            sp.rebuild_operators();
        }
        patch.update_neighbor_ranks(&restored.owners);
    }

    for step in 3..6 {
        step_once(&mut set, &mut comm, step);
        step_once(&mut restored, &mut comm, step);
    }

    for (a, b) in set.patches.iter().zip(&restored.patches) {
        assert_eq!(a.em.ey.data(), b.em.ey.data());
        assert_eq!(a.em.bz.data(), b.em.bz.data());
        assert_eq!(
            a.species[0].particles.position[0],
            b.species[0].particles.position[0]
        );
        assert_eq!(
            a.species[0].particles.momentum[0],
            b.species[0].particles.momentum[0]
        );
    }
}
