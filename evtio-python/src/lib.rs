//! Python bindings for the EVT 3.0 RAW reader and writer with numpy support.
//!
//! Events cross the boundary in columnar form: one numpy array per field
//! (`t`, `x`, `y`, `p`), which is what numpy code wants to work with.

use evtio_core::{
    Event, EventBatch, FileReader, FileWriter, RawFormat, RawReader, RawWriter, ReadError,
    ReadMode, ReaderOptions, Trigger, WriteError, WriterOptions,
};
use numpy::{IntoPyArray, PyArray1, PyReadonlyArray1};
use pyo3::exceptions::{PyIOError, PyNotImplementedError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::path::PathBuf;

fn read_error(e: ReadError) -> PyErr {
    match e {
        ReadError::Io(e) => PyIOError::new_err(e.to_string()),
        ReadError::Config(e) => PyValueError::new_err(e.to_string()),
        e @ ReadError::NotImplemented(_) => PyNotImplementedError::new_err(e.to_string()),
    }
}

fn write_error(e: WriteError) -> PyErr {
    match e {
        WriteError::Io(e) => PyIOError::new_err(e.to_string()),
        WriteError::Config(e) => PyValueError::new_err(e.to_string()),
        e @ WriteError::NotImplemented(_) => PyNotImplementedError::new_err(e.to_string()),
    }
}

fn closed() -> PyErr {
    PyValueError::new_err("I/O operation on closed file")
}

/// Columnar container for decoded CD events.
#[pyclass]
pub struct Events {
    t: Vec<u64>,
    x: Vec<u16>,
    y: Vec<u16>,
    p: Vec<u8>,
    sensor_width: u32,
    sensor_height: u32,
}

#[pymethods]
impl Events {
    fn __len__(&self) -> usize {
        self.t.len()
    }

    fn __repr__(&self) -> String {
        format!(
            "Events(count={}, sensor={}x{})",
            self.t.len(),
            self.sensor_width,
            self.sensor_height
        )
    }

    /// Timestamps in microseconds.
    #[getter]
    fn t<'py>(&self, py: Python<'py>) -> &'py PyArray1<u64> {
        self.t.clone().into_pyarray(py)
    }

    #[getter]
    fn x<'py>(&self, py: Python<'py>) -> &'py PyArray1<u16> {
        self.x.clone().into_pyarray(py)
    }

    #[getter]
    fn y<'py>(&self, py: Python<'py>) -> &'py PyArray1<u16> {
        self.y.clone().into_pyarray(py)
    }

    /// Polarities: 0 = OFF (decrease in brightness), 1 = ON (increase).
    #[getter]
    fn p<'py>(&self, py: Python<'py>) -> &'py PyArray1<u8> {
        self.p.clone().into_pyarray(py)
    }

    /// Returns a tuple of (width, height) for the sensor geometry.
    #[getter]
    fn sensor_size(&self) -> (u32, u32) {
        (self.sensor_width, self.sensor_height)
    }

    /// Returns all arrays as a dictionary keyed by `t`, `x`, `y`, `p`.
    ///
    /// This is useful for creating a pandas DataFrame or structured array.
    fn to_dict<'py>(&self, py: Python<'py>) -> PyResult<PyObject> {
        let dict = PyDict::new(py);
        dict.set_item("t", self.t.clone().into_pyarray(py))?;
        dict.set_item("x", self.x.clone().into_pyarray(py))?;
        dict.set_item("y", self.y.clone().into_pyarray(py))?;
        dict.set_item("p", self.p.clone().into_pyarray(py))?;
        Ok(dict.into())
    }
}

impl Events {
    fn from_events(events: &[Event], width: u32, height: u32) -> Self {
        let len = events.len();
        let mut t = Vec::with_capacity(len);
        let mut x = Vec::with_capacity(len);
        let mut y = Vec::with_capacity(len);
        let mut p = Vec::with_capacity(len);

        for event in events {
            t.push(event.t);
            x.push(event.x);
            y.push(event.y);
            p.push(event.p);
        }

        Self {
            t,
            x,
            y,
            p,
            sensor_width: width,
            sensor_height: height,
        }
    }
}

/// Columnar container for external trigger events.
#[pyclass]
pub struct Triggers {
    t: Vec<u64>,
    /// Edge polarity: 0 = falling, 1 = rising
    p: Vec<u8>,
    id: Vec<u8>,
}

#[pymethods]
impl Triggers {
    fn __len__(&self) -> usize {
        self.t.len()
    }

    #[getter]
    fn t<'py>(&self, py: Python<'py>) -> &'py PyArray1<u64> {
        self.t.clone().into_pyarray(py)
    }

    #[getter]
    fn p<'py>(&self, py: Python<'py>) -> &'py PyArray1<u8> {
        self.p.clone().into_pyarray(py)
    }

    /// Trigger channel IDs.
    #[getter]
    fn id<'py>(&self, py: Python<'py>) -> &'py PyArray1<u8> {
        self.id.clone().into_pyarray(py)
    }
}

impl Triggers {
    fn from_triggers(triggers: &[Trigger]) -> Self {
        Self {
            t: triggers.iter().map(|trigger| trigger.t).collect(),
            p: triggers.iter().map(|trigger| trigger.p).collect(),
            id: triggers.iter().map(|trigger| trigger.id).collect(),
        }
    }
}

fn batch_to_py(
    py: Python<'_>,
    batch: &EventBatch,
    shape: (u32, u32),
) -> PyResult<(Py<Events>, Py<Triggers>)> {
    let events = Events::from_events(&batch.events, shape.0, shape.1);
    let triggers = Triggers::from_triggers(&batch.triggers);
    Ok((Py::new(py, events)?, Py::new(py, triggers)?))
}

/// Windowed reader for RAW files.
///
/// Example:
///     >>> import evtio
///     >>> with evtio.EventReader("recording.raw", delta_t=10000) as reader:
///     ...     for events, triggers in reader:
///     ...         print(len(events), events.t[0] if len(events) else None)
#[pyclass]
pub struct EventReader {
    inner: Option<FileReader>,
    shape: (u32, u32),
}

impl EventReader {
    fn reader(&mut self) -> PyResult<&mut FileReader> {
        self.inner.as_mut().ok_or_else(closed)
    }
}

#[pymethods]
impl EventReader {
    #[new]
    #[pyo3(signature = (path, delta_t=None, n_events=None, mode="auto"))]
    fn new(path: PathBuf, delta_t: Option<u64>, n_events: Option<u64>, mode: &str) -> PyResult<Self> {
        let mode: ReadMode = mode
            .parse()
            .map_err(|e: evtio_core::ConfigError| PyValueError::new_err(e.to_string()))?;
        let options = ReaderOptions {
            mode,
            delta_t,
            n_events,
            ..ReaderOptions::default()
        };
        let reader = RawReader::open(&path, &options).map_err(read_error)?;
        Ok(Self {
            shape: reader.shape(),
            inner: Some(reader),
        })
    }

    /// Reads the next window as an `(Events, Triggers)` pair.
    ///
    /// Both are empty once the file is exhausted.
    fn read(&mut self, py: Python<'_>) -> PyResult<(Py<Events>, Py<Triggers>)> {
        let shape = self.shape;
        let batch = self.reader()?.read().map_err(read_error)?;
        batch_to_py(py, &batch, shape)
    }

    /// True once every event of the file has been handed out.
    fn is_eof(&self) -> bool {
        self.inner
            .as_ref()
            .map_or(true, |reader| reader.is_end_of_stream())
    }

    #[getter]
    fn width(&self) -> u32 {
        self.shape.0
    }

    #[getter]
    fn height(&self) -> u32 {
        self.shape.1
    }

    /// Events handed out so far.
    #[getter]
    fn n_read_events(&self) -> u64 {
        self.inner
            .as_ref()
            .map_or(0, |reader| reader.n_read_events())
    }

    fn close(&mut self) {
        self.inner = None;
    }

    fn __iter__(slf: PyRef<'_, Self>) -> PyRef<'_, Self> {
        slf
    }

    fn __next__(
        mut slf: PyRefMut<'_, Self>,
        py: Python<'_>,
    ) -> PyResult<Option<(Py<Events>, Py<Triggers>)>> {
        let shape = slf.shape;
        let reader = slf.reader()?;
        let batch = reader.read().map_err(read_error)?;
        if batch.is_empty() && reader.is_end_of_stream() {
            return Ok(None);
        }
        batch_to_py(py, &batch, shape).map(Some)
    }

    fn __enter__(slf: PyRef<'_, Self>) -> PyRef<'_, Self> {
        slf
    }

    fn __exit__(
        &mut self,
        _exc_type: Option<&PyAny>,
        _exc_value: Option<&PyAny>,
        _traceback: Option<&PyAny>,
    ) -> bool {
        self.close();
        false
    }
}

/// Incremental EVT 3.0 writer.
///
/// Example:
///     >>> import numpy as np, evtio
///     >>> with evtio.EventWriter("out.raw", width=640, height=480) as writer:
///     ...     writer.write(t, x, y, p)
#[pyclass]
pub struct EventWriter {
    inner: Option<FileWriter>,
}

#[pymethods]
impl EventWriter {
    #[new]
    #[pyo3(signature = (path, width=1280, height=720, serial="00000000", format="EVT3"))]
    fn new(path: PathBuf, width: u32, height: u32, serial: &str, format: &str) -> PyResult<Self> {
        let format: RawFormat = format
            .parse()
            .map_err(|e: evtio_core::types::UnknownFormat| PyValueError::new_err(e.to_string()))?;
        let options = WriterOptions {
            width,
            height,
            serial_number: serial.to_string(),
            format,
            ..WriterOptions::default()
        };
        let writer = RawWriter::create(&path, &options).map_err(write_error)?;
        Ok(Self {
            inner: Some(writer),
        })
    }

    /// Appends events given as four equally long arrays, sorted by `t`.
    fn write(
        &mut self,
        t: PyReadonlyArray1<'_, u64>,
        x: PyReadonlyArray1<'_, u16>,
        y: PyReadonlyArray1<'_, u16>,
        p: PyReadonlyArray1<'_, u8>,
    ) -> PyResult<()> {
        let contiguous = |e: numpy::NotContiguousError| PyValueError::new_err(e.to_string());
        let t = t.as_slice().map_err(contiguous)?;
        let x = x.as_slice().map_err(contiguous)?;
        let y = y.as_slice().map_err(contiguous)?;
        let p = p.as_slice().map_err(contiguous)?;

        if x.len() != t.len() || y.len() != t.len() || p.len() != t.len() {
            return Err(PyValueError::new_err(format!(
                "Arrays differ in length: t={}, x={}, y={}, p={}",
                t.len(),
                x.len(),
                y.len(),
                p.len()
            )));
        }

        let events: Vec<Event> = (0..t.len())
            .map(|i| Event::new(t[i], x[i], y[i], p[i]))
            .collect();

        let writer = self.inner.as_mut().ok_or_else(closed)?;
        writer.write(&events).map_err(write_error)
    }

    /// Events written so far.
    #[getter]
    fn n_written_events(&self) -> u64 {
        self.inner
            .as_ref()
            .map_or(0, |writer| writer.n_written_events())
    }

    /// Flushes and closes the file. Closing twice is a no-op.
    fn close(&mut self) -> PyResult<()> {
        match self.inner.take() {
            Some(writer) => writer.close().map_err(write_error),
            None => Ok(()),
        }
    }

    fn __enter__(slf: PyRef<'_, Self>) -> PyRef<'_, Self> {
        slf
    }

    fn __exit__(
        &mut self,
        _exc_type: Option<&PyAny>,
        _exc_value: Option<&PyAny>,
        _traceback: Option<&PyAny>,
    ) -> PyResult<bool> {
        self.close()?;
        Ok(false)
    }
}

/// Decodes a whole RAW file.
///
/// Args:
///     path: Path to the .raw file
///
/// Returns:
///     tuple: (Events, Triggers)
///
/// Example:
///     >>> import evtio
///     >>> events, triggers = evtio.decode_file("recording.raw")
///     >>> print(f"CD events: {len(events)}, Triggers: {len(triggers)}")
#[pyfunction]
fn decode_file(py: Python<'_>, path: PathBuf) -> PyResult<(Py<Events>, Py<Triggers>)> {
    let result = evtio_core::decode_file(&path).map_err(read_error)?;
    let batch = EventBatch {
        events: result.events,
        triggers: result.triggers,
    };
    batch_to_py(py, &batch, (result.header.width, result.header.height))
}

/// EVT 3.0 RAW reader and writer for Python.
#[pymodule]
fn evtio(_py: Python<'_>, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(decode_file, m)?)?;
    m.add_class::<EventReader>()?;
    m.add_class::<EventWriter>()?;
    m.add_class::<Events>()?;
    m.add_class::<Triggers>()?;
    Ok(())
}
