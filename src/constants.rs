//! Physical constants (SI units, energies in eV)

/// Speed of light in vacuum (m/s)
pub const C0: f64 = 299_792_458.0;
/// Elementary charge (C)
pub const ELECTRON_CHARGE: f64 = 1.602_176_634e-19;
/// Classical electron radius (m)
pub const ELECTRON_RADIUS: f64 = 2.817_940_326_2e-15;
/// Electron rest energy (eV)
pub const ELECTRON_MASS_EV: f64 = 0.510_998_950e6;
/// Proton rest energy (eV)
pub const PROTON_MASS_EV: f64 = 938.272_088_16e6;
/// Boltzmann constant (J/K)
pub const BOLTZMANN: f64 = 1.380_649e-23;
/// Impedance of free space (Ohm)
pub const Z0: f64 = 376.730_313_668;
